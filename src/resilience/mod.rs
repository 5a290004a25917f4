//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt on host H fails with a TransportError:
//!     → registry.mark_unhealthy(H)
//!     → failover.rs (retryable? budget left? exclude every host tried)
//!     → backoff.rs (optional jittered delay between hops)
//!     → next attempt on a fresh host
//! ```
//!
//! # Design Decisions
//! - Only transport faults rotate hosts; server rejections pass through
//! - The attempt budget is fixed at submission from the eligible host count
//! - Backoff defaults to zero so failover is immediate

pub mod backoff;
pub mod failover;

pub use backoff::calculate_backoff;
pub use failover::{FailoverPolicy, FailoverState};
