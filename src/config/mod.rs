//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → consumed once by Client::builder
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a client is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ClientConfig, CompressionAlgorithm, CompressionConfig, DiagnosticsConfig, ExecutorConfig,
    HealthConfig, IdentityConfig, LoadBalancingStrategy, ObservabilityConfig, PoolConfig,
    Protocol, ProtocolConfig, RetryConfig, TimeoutConfig, TopologyConfig,
};
pub use validation::{validate_config, ValidationError};
