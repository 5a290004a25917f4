//! docwire: communication core of a document-database client.
//!
//! A [`Client`] dispatches [`Request`]s to one of several server endpoints
//! over a pooled, protocol-specific transport, failing over between hosts on
//! connection-level faults.
//!
//! ```no_run
//! use docwire::{Client, ClientConfig, Request, RequestOptions};
//!
//! let client = Client::new(ClientConfig::with_hosts(["127.0.0.1:8529"]))?;
//! let response = client.execute_sync(Request::get("/_api/version"), RequestOptions::new())?;
//! println!("{}", response.status);
//! client.close();
//! # Ok::<(), docwire::ClientError>(())
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod execution;
pub mod host;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use codec::{Codec, JsonCodec, SerdeContext};
pub use config::{ClientConfig, LoadBalancingStrategy, Protocol};
pub use error::{ClientError, Result, TransportError};
pub use execution::{Method, Request, RequestOptions, RequestPhase, Response, ResultHandle};
pub use host::{HealthState, HostSnapshot, MergeOutcome};
