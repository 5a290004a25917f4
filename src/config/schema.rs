//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a client instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seed hosts as `host:port`, in registration order.
    pub hosts: Vec<String>,

    /// Wire protocol selection and per-protocol budgets.
    pub protocol: ProtocolConfig,

    /// Connection pool lifecycle settings.
    pub pool: PoolConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Topology discovery settings.
    pub topology: TopologyConfig,

    /// Host selection policy.
    pub load_balancing: LoadBalancingStrategy,

    /// Failover configuration.
    pub retries: RetryConfig,

    /// Host health settings.
    pub health: HealthConfig,

    /// Request-processing executor.
    pub executor: ExecutorConfig,

    /// Diagnostics sampling.
    pub diagnostics: DiagnosticsConfig,

    /// Payload compression.
    pub compression: CompressionConfig,

    /// Identifying header sent with every request.
    pub identity: IdentityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:8529".to_string()],
            protocol: ProtocolConfig::default(),
            pool: PoolConfig::default(),
            timeouts: TimeoutConfig::default(),
            topology: TopologyConfig::default(),
            load_balancing: LoadBalancingStrategy::default(),
            retries: RetryConfig::default(),
            health: HealthConfig::default(),
            executor: ExecutorConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            compression: CompressionConfig::default(),
            identity: IdentityConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Shorthand for a default config targeting the given hosts.
    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Wire protocol variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// HTTP/1.1, one request per connection at a time.
    #[default]
    Text,
    /// HTTP/2, many concurrent streams per connection.
    Multiplexed,
    /// Chunked binary framing with interleaved messages.
    Chunked,
}

impl Protocol {
    /// Connection budget used when the config leaves `max_connections` unset.
    pub fn default_max_connections(self) -> usize {
        match self {
            Protocol::Text => 20,
            Protocol::Multiplexed => 1,
            Protocol::Chunked => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Text => "text",
            Protocol::Multiplexed => "multiplexed",
            Protocol::Chunked => "chunked",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol selection and budgets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Which wire protocol to speak.
    pub kind: Protocol,

    /// Maximum connections per host; protocol default when unset.
    pub max_connections: Option<usize>,

    /// In-flight limit per connection for the multiplexed and chunked variants.
    /// The text variant is always limited to one.
    pub max_concurrent_streams: usize,

    /// Chunk payload size in bytes for the chunked variant.
    pub chunk_size: usize,

    /// Largest reassembled response accepted by the chunked variant.
    pub max_message_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            kind: Protocol::Text,
            max_connections: None,
            max_concurrent_streams: 64,
            chunk_size: 30_000,
            max_message_bytes: 256 * 1024 * 1024,
        }
    }
}

impl ProtocolConfig {
    /// Effective per-host connection budget.
    pub fn max_connections(&self) -> usize {
        self.max_connections
            .unwrap_or_else(|| self.kind.default_max_connections())
    }

    /// Effective per-connection concurrency.
    pub fn max_in_flight(&self) -> usize {
        match self.kind {
            Protocol::Text => 1,
            Protocol::Multiplexed | Protocol::Chunked => self.max_concurrent_streams,
        }
    }
}

/// Connection pool lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connection lifetime in seconds; unlimited when unset.
    pub connection_ttl_secs: Option<u64>,

    /// Idle period after which a connection is probed, in seconds.
    pub keep_alive_interval_secs: Option<u64>,

    /// Maximum wait for a connection when the budget is exhausted.
    pub acquire_timeout_ms: u64,

    /// Reaper tick interval in milliseconds.
    pub reaper_interval_ms: u64,

    /// Time allowed for in-flight requests on shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection_ttl_secs: None,
            keep_alive_interval_secs: Some(30),
            acquire_timeout_ms: 10_000,
            reaper_interval_ms: 1_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn connection_ttl(&self) -> Option<Duration> {
        self.connection_ttl_secs.map(Duration::from_secs)
    }

    pub fn keep_alive_interval(&self) -> Option<Duration> {
        self.keep_alive_interval_secs.map(Duration::from_secs)
    }
}

/// Timeout configuration for the two request phases.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Overall request timeout in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: 30_000,
        }
    }
}

/// Topology discovery settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Refresh the host list in the background.
    pub auto_refresh: bool,

    /// Interval between background refreshes in seconds.
    pub interval_secs: u64,

    /// Endpoint listing the cluster's coordinators.
    pub endpoint_path: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            auto_refresh: false,
            interval_secs: 60,
            endpoint_path: "/_api/cluster/endpoints".to_string(),
        }
    }
}

/// Host selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Stick to the first eligible host.
    #[default]
    Pinned,
    /// Cycle through eligible hosts.
    RoundRobin,
    /// Uniform random choice among eligible hosts.
    Random,
}

/// Failover configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable failover for retryable requests.
    pub enabled: bool,

    /// Optional cap on failover hops below the eligible-host bound.
    pub max_failover_hops: Option<u32>,

    /// Base delay for exponential backoff between hops in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failover_hops: None,
            base_delay_ms: 0,
            max_delay_ms: 1_000,
        }
    }
}

/// Host health settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds after a failure before an unhealthy host is tried again.
    pub recovery_secs: u64,

    /// Path requested by keep-alive probes.
    pub probe_path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            recovery_secs: 30,
            probe_path: "/_api/version".to_string(),
        }
    }
}

/// Request-processing executor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker threads of the client-owned runtime.
    pub worker_threads: usize,

    /// Maximum requests processed concurrently, across all hosts.
    pub max_concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            max_concurrency: 256,
        }
    }
}

/// Diagnostics sampling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Number of recent queue-wait samples kept.
    pub queue_time_samples: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            queue_time_samples: 10,
        }
    }
}

/// Compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CompressionAlgorithm {
    #[default]
    Zstd,
}

impl CompressionAlgorithm {
    /// Value used in `content-encoding` / `accept-encoding`.
    pub fn encoding(self) -> &'static str {
        match self {
            CompressionAlgorithm::Zstd => "zstd",
        }
    }
}

/// Payload compression.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,

    pub algorithm: CompressionAlgorithm,

    /// Bodies strictly larger than this many bytes are compressed.
    pub threshold_bytes: usize,

    /// Algorithm effort level.
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: CompressionAlgorithm::Zstd,
            threshold_bytes: 1024,
            level: 3,
        }
    }
}

/// Identifying header sent with every request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub header_name: String,

    /// Template with `{version}` and `{protocol}` placeholders.
    pub header_template: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header_name: "x-docwire-driver".to_string(),
            header_template: "docwire/{version} ({protocol})".to_string(),
        }
    }
}

impl IdentityConfig {
    /// Render the header value for the given protocol.
    pub fn render(&self, protocol: Protocol) -> String {
        self.header_template
            .replace("{version}", env!("CARGO_PKG_VERSION"))
            .replace("{protocol}", protocol.as_str())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
