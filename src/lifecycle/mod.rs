//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Client build:
//!     validate config → runtime → registry, pool → background tasks
//!         (pool reaper, optional topology refresher) subscribe to Shutdown
//!
//! Client shutdown:
//!     Shutdown::trigger → background tasks exit
//!     → pool.shutdown(grace) → owned runtime torn down
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
