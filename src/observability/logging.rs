//! Structured logging.
//!
//! The library only emits `tracing` events. Binaries and tests that want
//! them printed call [`init_logging`] once.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a registry with an `EnvFilter` and a fmt layer.
///
/// `RUST_LOG` wins over `default_level`. Calling this twice is harmless;
/// the second subscriber is ignored.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("docwire={default_level}")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
