//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline / pool / registry / topology produce:
//!     → tracing events and spans (request_id on every request span)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers (opt-in):
//!     → logging.rs installs a fmt subscriber
//!     → metrics.rs installs a Prometheus exporter
//! ```

pub mod logging;
pub mod metrics;
