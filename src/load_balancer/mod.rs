//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request submitted
//!     → registry snapshot (hosts in registration order)
//!     → drop ineligible hosts and hosts already tried by this request
//!     → Apply load balancing policy:
//!         - pinned.rs (first eligible host)
//!         - round_robin.rs (rotate through hosts)
//!         - random.rs (uniform pick)
//!     → selected host or NoAvailableHost
//! ```
//!
//! # Design Decisions
//! - Policies only see eligible candidates; health filtering happens once here
//! - Policy state (round-robin cursor) lives for the client's lifetime
//! - Cursor updates are atomic; no lock on the pick path

pub mod pinned;
pub mod random;
pub mod round_robin;

use std::sync::Arc;
use std::time::Duration;

use crate::config::LoadBalancingStrategy;
use crate::host::Host;

pub use pinned::Pinned;
pub use random::Random;
pub use round_robin::RoundRobin;

/// A host selection policy.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick one of `candidates`, which is non-empty and in registration order.
    fn next_host(&self, candidates: &[Arc<Host>]) -> Option<Arc<Host>>;
}

/// Build the policy named by the configuration.
pub fn from_strategy(strategy: LoadBalancingStrategy) -> Arc<dyn LoadBalancer> {
    match strategy {
        LoadBalancingStrategy::Pinned => Arc::new(Pinned::new()),
        LoadBalancingStrategy::RoundRobin => Arc::new(RoundRobin::new()),
        LoadBalancingStrategy::Random => Arc::new(Random::new()),
    }
}

/// Filter `hosts` to eligible ones not in `excluded`, then apply `policy`.
pub fn pick(
    policy: &dyn LoadBalancer,
    hosts: &[Arc<Host>],
    excluded: &[Arc<Host>],
    recovery: Duration,
) -> Option<Arc<Host>> {
    let candidates: Vec<Arc<Host>> = hosts
        .iter()
        .filter(|h| h.is_eligible(recovery))
        .filter(|h| excluded.iter().all(|e| e.address() != h.address()))
        .cloned()
        .collect();
    if candidates.is_empty() {
        tracing::debug!(
            known = hosts.len(),
            excluded = excluded.len(),
            "No eligible host to pick"
        );
        return None;
    }
    policy.next_host(&candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(n: usize) -> Vec<Arc<Host>> {
        (0..n)
            .map(|i| Arc::new(Host::new(format!("127.0.0.1:{}", 8000 + i))))
            .collect()
    }

    #[test]
    fn pick_fails_when_no_host_is_healthy() {
        let all = hosts(2);
        for h in &all {
            h.mark_unhealthy();
        }
        let lb = RoundRobin::new();
        assert!(pick(&lb, &all, &[], Duration::from_secs(30)).is_none());
    }

    #[test]
    fn pick_honours_exclusions() {
        let all = hosts(3);
        let lb = Pinned::new();
        let excluded = vec![all[0].clone(), all[1].clone()];
        let picked = pick(&lb, &all, &excluded, Duration::from_secs(30)).unwrap();
        assert_eq!(picked.address(), all[2].address());
    }

    #[test]
    fn round_robin_skips_unhealthy_hosts_evenly() {
        let all = hosts(3);
        all[1].mark_unhealthy();
        let lb = RoundRobin::new();
        let picks: Vec<String> = (0..4)
            .map(|_| {
                pick(&lb, &all, &[], Duration::from_secs(30))
                    .unwrap()
                    .address()
                    .to_string()
            })
            .collect();
        assert_eq!(
            picks,
            vec![
                all[0].address(),
                all[2].address(),
                all[0].address(),
                all[2].address()
            ]
        );
    }
}
