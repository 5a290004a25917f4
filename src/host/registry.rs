//! Host registry.
//!
//! # Responsibilities
//! - Hold the known hosts in registration order
//! - Merge topology refresh results without ever emptying the set
//! - Feed health changes to the load balancer
//!
//! Readers load a snapshot through `ArcSwap`; writers serialize on a mutex
//! and publish a new list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::host::endpoint::{HealthState, Host};
use crate::observability::metrics;

/// Point-in-time view of one host, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSnapshot {
    pub address: String,
    pub health: HealthState,
}

/// Result of merging a topology listing into the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Hosts absent from the listing that were kept to avoid losing reachability.
    pub retained: Vec<String>,
}

impl MergeOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Known hosts and their health.
#[derive(Debug)]
pub struct HostRegistry {
    hosts: ArcSwap<Vec<Arc<Host>>>,
    write: Mutex<()>,
    recovery: Duration,
}

impl HostRegistry {
    /// Create a registry seeded with `addresses`.
    pub fn new<I, S>(addresses: I, recovery: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self {
            hosts: ArcSwap::from_pointee(Vec::new()),
            write: Mutex::new(()),
            recovery,
        };
        registry.seed(addresses);
        registry
    }

    /// Replace the known set. Duplicates keep their first position.
    pub fn seed<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _guard = self.write.lock().expect("host registry mutex poisoned");
        let mut hosts: Vec<Arc<Host>> = Vec::new();
        for address in addresses {
            let address = address.into();
            if hosts.iter().all(|h| h.address() != address) {
                hosts.push(Arc::new(Host::new(address)));
            }
        }
        tracing::debug!(count = hosts.len(), "Host registry seeded");
        self.hosts.store(Arc::new(hosts));
    }

    /// Current hosts in registration order.
    pub fn hosts(&self) -> Arc<Vec<Arc<Host>>> {
        self.hosts.load_full()
    }

    pub fn len(&self) -> usize {
        self.hosts.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.load().is_empty()
    }

    pub fn find(&self, address: &str) -> Option<Arc<Host>> {
        self.hosts
            .load()
            .iter()
            .find(|h| h.address() == address)
            .cloned()
    }

    /// How long an unhealthy host sits out before it is tried again.
    pub fn recovery(&self) -> Duration {
        self.recovery
    }

    /// Hosts the load balancer may pick right now.
    pub fn eligible_count(&self) -> usize {
        self.hosts
            .load()
            .iter()
            .filter(|h| h.is_eligible(self.recovery))
            .count()
    }

    pub fn mark_unhealthy(&self, host: &Host) {
        if host.mark_unhealthy() {
            tracing::warn!(host = %host.address(), "Host marked unhealthy");
        }
        metrics::record_host_health(host.address(), false);
    }

    pub fn mark_healthy(&self, host: &Host) {
        if host.mark_healthy() {
            tracing::info!(host = %host.address(), "Host marked healthy");
            metrics::record_host_health(host.address(), true);
        }
    }

    pub fn snapshot(&self) -> Vec<HostSnapshot> {
        self.hosts
            .load()
            .iter()
            .map(|h| HostSnapshot {
                address: h.address().to_string(),
                health: h.health(),
            })
            .collect()
    }

    /// Merge a topology listing.
    ///
    /// Hosts keep their health across refreshes. A host missing from the
    /// listing is dropped unless the merged set would otherwise contain no
    /// reachable host; an empty listing leaves the registry untouched.
    pub fn merge<I, S>(&self, listing: I) -> MergeOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _guard = self.write.lock().expect("host registry mutex poisoned");
        let current = self.hosts.load_full();
        let by_address: HashMap<&str, &Arc<Host>> =
            current.iter().map(|h| (h.address(), h)).collect();

        let mut outcome = MergeOutcome::default();
        let mut merged: Vec<Arc<Host>> = Vec::new();
        for address in listing {
            let address = address.into();
            if merged.iter().any(|h| h.address() == address) {
                continue;
            }
            match by_address.get(address.as_str()) {
                Some(existing) => merged.push(Arc::clone(existing)),
                None => {
                    outcome.added.push(address.clone());
                    merged.push(Arc::new(Host::new(address)));
                }
            }
        }

        if merged.is_empty() {
            tracing::warn!("Topology listing was empty, keeping current hosts");
            return MergeOutcome::default();
        }

        let absent: Vec<&Arc<Host>> = current
            .iter()
            .filter(|h| merged.iter().all(|m| m.address() != h.address()))
            .collect();
        // Only a confirmed-healthy host counts as reachable; never-contacted
        // listing entries do not.
        let known_reachable = |h: &Host| h.health() == HealthState::Healthy;
        let merged_reachable = merged.iter().any(|h| known_reachable(h));
        for host in absent {
            if !merged_reachable && known_reachable(host) {
                outcome.retained.push(host.address().to_string());
                merged.push(Arc::clone(host));
            } else {
                outcome.removed.push(host.address().to_string());
            }
        }

        if !outcome.is_unchanged() {
            tracing::info!(
                added = ?outcome.added,
                removed = ?outcome.removed,
                total = merged.len(),
                "Host registry updated"
            );
        }
        self.hosts.store(Arc::new(merged));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(registry: &HostRegistry) -> Vec<String> {
        registry.hosts().iter().map(|h| h.address().to_string()).collect()
    }

    #[test]
    fn seed_preserves_order_and_dedups() {
        let registry = HostRegistry::new(["a:1", "b:1", "a:1", "c:1"], Duration::from_secs(30));
        assert_eq!(addresses(&registry), vec!["a:1", "b:1", "c:1"]);
    }

    #[test]
    fn merge_adds_and_removes_but_keeps_health() {
        let registry = HostRegistry::new(["a:1", "b:1"], Duration::from_secs(30));
        let b = registry.find("b:1").unwrap();
        registry.mark_healthy(&b);

        let outcome = registry.merge(["b:1", "c:1"]);
        assert_eq!(outcome.added, vec!["c:1"]);
        assert_eq!(outcome.removed, vec!["a:1"]);
        assert_eq!(addresses(&registry), vec!["b:1", "c:1"]);
        assert_eq!(registry.find("b:1").unwrap().health(), HealthState::Healthy);
    }

    #[test]
    fn empty_listing_never_empties_registry() {
        let registry = HostRegistry::new(["a:1"], Duration::from_secs(30));
        let outcome = registry.merge(Vec::<String>::new());
        assert!(outcome.is_unchanged());
        assert_eq!(addresses(&registry), vec!["a:1"]);
    }

    #[test]
    fn sole_reachable_host_is_retained() {
        let registry = HostRegistry::new(["a:1", "b:1"], Duration::from_secs(30));
        registry.mark_healthy(&registry.find("a:1").unwrap());
        let b = registry.find("b:1").unwrap();
        registry.mark_unhealthy(&b);

        // Listing only names the unhealthy host; "a" is the last reachable one.
        let outcome = registry.merge(["b:1"]);
        assert_eq!(outcome.retained, vec!["a:1"]);
        assert_eq!(addresses(&registry), vec!["b:1", "a:1"]);
    }

    #[test]
    fn untried_hosts_do_not_displace_the_healthy_one() {
        let registry = HostRegistry::new(["a:1"], Duration::from_secs(30));
        registry.mark_healthy(&registry.find("a:1").unwrap());

        let outcome = registry.merge(["b:1"]);
        assert_eq!(outcome.added, vec!["b:1"]);
        assert_eq!(outcome.retained, vec!["a:1"]);
        assert!(outcome.removed.is_empty());
        assert_eq!(addresses(&registry), vec!["b:1", "a:1"]);

        // Once a listed host is confirmed healthy, the stale one goes.
        registry.mark_healthy(&registry.find("b:1").unwrap());
        let outcome = registry.merge(["b:1"]);
        assert_eq!(outcome.removed, vec!["a:1"]);
        assert_eq!(addresses(&registry), vec!["b:1"]);
    }

    #[test]
    fn registry_survives_arbitrary_refresh_sequences() {
        let registry = HostRegistry::new(["a:1"], Duration::from_secs(30));
        let listings: Vec<Vec<&str>> = vec![vec![], vec!["b:1"], vec![], vec!["c:1", "b:1"], vec![]];
        for listing in listings {
            registry.merge(listing);
            assert!(!registry.is_empty());
        }
        assert_eq!(addresses(&registry), vec!["c:1", "b:1"]);
    }

    #[test]
    fn eligible_count_skips_unhealthy_hosts() {
        let registry = HostRegistry::new(["a:1", "b:1", "c:1"], Duration::from_secs(30));
        registry.mark_unhealthy(&registry.find("a:1").unwrap());
        assert_eq!(registry.eligible_count(), 2);
    }
}
