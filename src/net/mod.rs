//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Pool needs a new connection
//!     → connector.rs (TCP connect with timeout, TCP_NODELAY)
//!     → transport handshake (text / multiplexed / chunked)
//!     → connection.rs (lifecycle tracking, in-flight accounting)
//!     → owned by its pool slot
//!
//! Connection States:
//!     Idle ⇄ Busy → Closed
//! ```

pub mod connection;
pub mod connector;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use connector::TcpConnector;
