//! Host registry subsystem.
//!
//! # Data Flow
//! ```text
//! Bootstrap:
//!     config.hosts → registry.rs (seed)
//!
//! Topology discovery (topology.rs):
//!     Periodic timer or explicit refresh
//!     → GET endpoint listing over one live connection
//!     → registry.rs (merge, never empties)
//!
//! Health (endpoint.rs):
//!     failover controller → mark_unhealthy
//!     successful response → mark_healthy
//!     recovery period elapsed → eligible again
//! ```
//!
//! # Design Decisions
//! - Lock-free reads for pickers, serialized writers
//! - Health is per-host and survives refreshes
//! - Refresh failures never reach in-flight requests

pub mod endpoint;
pub mod registry;
pub mod topology;

pub use endpoint::{HealthState, Host};
pub use registry::{HostRegistry, HostSnapshot, MergeOutcome};
pub use topology::{parse_endpoints, TopologyRefresher};
