//! Host abstraction.
//!
//! # Responsibilities
//! - Represent a single server endpoint
//! - Track health state (Unknown/Healthy/Unhealthy)
//! - Remember when it last failed so it can be retried after recovery

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// A single server endpoint.
#[derive(Debug)]
pub struct Host {
    /// `host:port` of the endpoint.
    address: String,
    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    /// Millis since `epoch` of the last failure, 0 when it never failed.
    last_failure: AtomicU64,
    epoch: Instant,
}

impl Host {
    /// Create a new host in the `Unknown` state.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: AtomicU8::new(HealthState::Unknown as u8),
            last_failure: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// Return true if host is considered healthy (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.health() != HealthState::Unhealthy
    }

    /// Healthy, or unhealthy for longer than `recovery`.
    pub fn is_eligible(&self, recovery: Duration) -> bool {
        if self.is_healthy() {
            return true;
        }
        match self.last_failure() {
            Some(at) => at.elapsed() >= recovery,
            None => true,
        }
    }

    /// When the host last failed, if ever.
    pub fn last_failure(&self) -> Option<Instant> {
        match self.last_failure.load(Ordering::Acquire) {
            0 => None,
            millis => Some(self.epoch + Duration::from_millis(millis)),
        }
    }

    /// Record a successful exchange. Returns true on a state transition.
    pub fn mark_healthy(&self) -> bool {
        let prev = self.state.swap(HealthState::Healthy as u8, Ordering::AcqRel);
        prev != HealthState::Healthy as u8
    }

    /// Record a connection-level failure. Returns true on a state transition.
    pub fn mark_unhealthy(&self) -> bool {
        // +1 keeps a failure in the first millisecond distinguishable from "never".
        let millis = self.epoch.elapsed().as_millis() as u64 + 1;
        self.last_failure.store(millis, Ordering::Release);
        let prev = self.state.swap(HealthState::Unhealthy as u8, Ordering::AcqRel);
        prev != HealthState::Unhealthy as u8
    }
}
