//! Async execution subsystem.
//!
//! # Data Flow
//! ```text
//! Client::execute(request, options)
//!     → executor.rs (task per request, concurrency permit)
//!     → pipeline.rs (host pick, pool acquire, send, failover)
//!     → connection and permit released
//!     → decode with the call's SerdeContext
//!     → handle.rs (resolve once; wake blocking and async waiters)
//!
//! Handle phases:
//!     Submitted → HostSelected → ConnectionAcquired → Sent → Completed
//! ```
//!
//! # Design Decisions
//! - One mechanism for blocking and async callers
//! - Continuations are tasks, never inline callbacks, so they may re-enter
//!   the client without holding any pool or executor resource

pub mod executor;
pub mod handle;
pub mod pipeline;
pub mod queue_time;
mod request;

pub use executor::Executor;
pub use handle::{RequestPhase, ResultHandle};
pub use pipeline::{Pipeline, TRANSACTION_HEADER};
pub use queue_time::QueueTimeSampler;
pub use request::{Method, Request, RequestOptions, Response, WireRequest};
