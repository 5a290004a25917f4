//! Wire protocol transport subsystem.
//!
//! # Data Flow
//! ```text
//! Pool opens a connection
//!     → Transport::open(address)
//!         - text.rs        (HTTP/1.1, one request at a time)
//!         - multiplexed.rs (HTTP/2 streams over one connection)
//!         - chunked/       (binary chunks, interleaved messages)
//!     → Box<dyn Channel> owned by a net::Connection
//!
//! Pipeline sends a request
//!     → compression.rs (compress body above threshold, declare via header)
//!     → Channel::send(WireRequest)
//!     → Response (decompressed when the header says so)
//! ```
//!
//! # Design Decisions
//! - Every variant owns its open/close/liveness semantics
//! - Multiplexed variants are frame-clean after an abandoned request, text is not
//! - Compression is declared, never sniffed

pub mod chunked;
pub mod compression;
mod http;
pub mod multiplexed;
pub mod text;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{Protocol, ProtocolConfig};
use crate::error::TransportError;
use crate::execution::{Method, Response, WireRequest};
use crate::net::TcpConnector;

pub use chunked::ChunkedTransport;
pub use multiplexed::MultiplexedTransport;
pub use text::TextTransport;

/// Factory for channels of one protocol variant.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    fn protocol(&self) -> Protocol;

    /// Open a channel to `address` (`host:port`).
    async fn open(&self, address: &str) -> Result<Box<dyn Channel>, TransportError>;

    /// Whether a channel stays frame-clean when a request is abandoned
    /// mid-exchange, so the connection can be reused.
    fn recovers_from_timeout(&self) -> bool;
}

/// One open channel to one host.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<Response, TransportError>;

    /// Liveness probe. Any well-formed response proves the channel alive.
    async fn probe(&self, path: &str) -> Result<(), TransportError> {
        let request = WireRequest {
            method: Method::Get,
            path: path.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        };
        self.send(request)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Probe(e.to_string()))
    }

    fn is_open(&self) -> bool;

    fn close(&self);
}

/// Build the transport selected by the configuration.
pub fn from_config(config: &ProtocolConfig, connect_timeout: Duration) -> Arc<dyn Transport> {
    let connector = TcpConnector::new(connect_timeout);
    match config.kind {
        Protocol::Text => Arc::new(TextTransport::new(connector)),
        Protocol::Multiplexed => Arc::new(MultiplexedTransport::new(connector)),
        Protocol::Chunked => Arc::new(ChunkedTransport::new(
            connector,
            config.chunk_size,
            config.max_message_bytes,
        )),
    }
}
