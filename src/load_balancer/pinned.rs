//! Pinned host strategy.

use std::sync::Arc;

use crate::host::Host;
use crate::load_balancer::LoadBalancer;

/// Always selects the first eligible host in registration order.
/// When that host fails it drops out of the candidates and the next one
/// becomes the pin.
#[derive(Debug, Default)]
pub struct Pinned;

impl Pinned {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for Pinned {
    fn next_host(&self, candidates: &[Arc<Host>]) -> Option<Arc<Host>> {
        candidates.first().cloned()
    }
}
