//! Random load balancing strategy.

use std::sync::Arc;

use crate::host::Host;
use crate::load_balancer::LoadBalancer;

/// Uniform random pick among candidates.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for Random {
    fn next_host(&self, candidates: &[Arc<Host>]) -> Option<Arc<Host>> {
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[fastrand::usize(..candidates.len())].clone())
    }
}
