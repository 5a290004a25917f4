//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (budgets > 0, timeouts > 0, compression level)
//! - `pool.acquire_timeout_ms = 0` is allowed and means fail fast when a
//!   host's budget is exhausted
//! - Check that every host address has a host and a port
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use crate::config::schema::{ClientConfig, Protocol};
use crate::transport::chunked::chunk::MAX_CHUNK_PAYLOAD;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("at least one host is required")]
    NoHosts,

    #[error("invalid host address '{0}': expected host:port")]
    InvalidHost(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("compression level {0} is outside 1..=22")]
    CompressionLevel(i32),

    #[error("chunk size {0} is outside {min}..={max}", min = MIN_CHUNK_SIZE, max = MAX_CHUNK_PAYLOAD)]
    ChunkSize(usize),
}

/// Smallest chunk payload accepted by the chunked transport.
pub const MIN_CHUNK_SIZE: usize = 16;

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.hosts.is_empty() {
        errors.push(ValidationError::NoHosts);
    }
    for host in &config.hosts {
        if !is_host_port(host) {
            errors.push(ValidationError::InvalidHost(host.clone()));
        }
    }

    let mut non_zero = |value: u64, field: &'static str| {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    };
    non_zero(config.protocol.max_connections() as u64, "protocol.max_connections");
    if config.protocol.kind != Protocol::Text {
        non_zero(
            config.protocol.max_concurrent_streams as u64,
            "protocol.max_concurrent_streams",
        );
    }
    non_zero(config.pool.reaper_interval_ms, "pool.reaper_interval_ms");
    non_zero(config.timeouts.connect_ms, "timeouts.connect_ms");
    non_zero(config.timeouts.request_ms, "timeouts.request_ms");
    non_zero(config.topology.interval_secs, "topology.interval_secs");
    non_zero(config.executor.worker_threads as u64, "executor.worker_threads");
    non_zero(config.executor.max_concurrency as u64, "executor.max_concurrency");
    non_zero(
        config.diagnostics.queue_time_samples as u64,
        "diagnostics.queue_time_samples",
    );
    if let Some(ttl) = config.pool.connection_ttl_secs {
        non_zero(ttl, "pool.connection_ttl_secs");
    }
    if let Some(interval) = config.pool.keep_alive_interval_secs {
        non_zero(interval, "pool.keep_alive_interval_secs");
    }

    if config.compression.enabled && !(1..=22).contains(&config.compression.level) {
        errors.push(ValidationError::CompressionLevel(config.compression.level));
    }
    if config.protocol.kind == Protocol::Chunked {
        let chunk_size = config.protocol.chunk_size;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_PAYLOAD as usize).contains(&chunk_size) {
            errors.push(ValidationError::ChunkSize(chunk_size));
        }
        if config.protocol.max_message_bytes == 0 {
            errors.push(ValidationError::Zero {
                field: "protocol.max_message_bytes",
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ClientConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ClientConfig::with_hosts(["db.local", "db2:8529"]);
        config.executor.max_concurrency = 0;
        config.diagnostics.queue_time_samples = 0;
        config.compression.enabled = true;
        config.compression.level = 40;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::InvalidHost("db.local".into()),
                ValidationError::Zero { field: "executor.max_concurrency" },
                ValidationError::Zero { field: "diagnostics.queue_time_samples" },
                ValidationError::CompressionLevel(40),
            ]
        );
    }

    #[test]
    fn rejects_empty_host_list_and_tiny_chunks() {
        let mut config = ClientConfig::with_hosts(Vec::<String>::new());
        config.protocol.kind = Protocol::Chunked;
        config.protocol.chunk_size = 4;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::NoHosts));
        assert!(errors.contains(&ValidationError::ChunkSize(4)));
    }

    #[test]
    fn rejects_chunks_above_frame_limit() {
        let mut config = ClientConfig::with_hosts(["db:8529"]);
        config.protocol.kind = Protocol::Chunked;
        config.protocol.chunk_size = MAX_CHUNK_PAYLOAD as usize;
        assert_eq!(validate_config(&config), Ok(()));

        config.protocol.chunk_size = MAX_CHUNK_PAYLOAD as usize + 1;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::ChunkSize(MAX_CHUNK_PAYLOAD as usize + 1)])
        );
    }

    #[test]
    fn zero_acquire_timeout_is_fail_fast_not_invalid() {
        let mut config = ClientConfig::with_hosts(["db:8529"]);
        config.pool.acquire_timeout_ms = 0;
        assert_eq!(validate_config(&config), Ok(()));
    }
}
