//! Error taxonomy shared by every subsystem.
//!
//! # Propagation
//! ```text
//! TransportError  → absorbed by resilience::failover up to its bound,
//!                   then surfaced as ClientError::Transport
//! Application     → passed through untouched, never retried
//! Serialization   → surfaced, never retried
//! Pool / host     → surfaced to the caller
//! ```

use std::time::Duration;

use crate::config::ValidationError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Connection-level faults. These are the only failures that drive failover.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("connect to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("liveness probe failed: {0}")]
    Probe(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        if err.is_closed() || err.is_canceled() || err.is_incomplete_message() {
            TransportError::Closed
        } else {
            TransportError::Protocol(err.to_string())
        }
    }
}

/// Errors surfaced to callers of the client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Configuration(Vec<ValidationError>),

    #[error("no available host")]
    NoAvailableHost,

    #[error("connection pool exhausted for {address}")]
    PoolExhausted { address: String },

    #[error("timed out after {waited:?} waiting for a connection to {address}")]
    AcquireTimeout { address: String, waited: Duration },

    #[error("connection pool is shut down")]
    PoolClosed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("server rejected request with status {status}: {message}")]
    Application {
        status: u16,
        error_num: Option<i64>,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("failed to start runtime: {0}")]
    Runtime(String),
}

impl ClientError {
    /// True for connection-level faults that may be retried on another host.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }

    /// HTTP-style status of an application error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Application { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
