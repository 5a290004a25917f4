//! Failover decisions for one request.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ClientError;
use crate::host::Host;
use crate::resilience::backoff::calculate_backoff;

/// Configured failover behaviour, shared by every request of a client.
#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    enabled: bool,
    max_hops: Option<u32>,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl FailoverPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_hops: config.max_failover_hops,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Total attempts allowed for a request submitted while `eligible`
    /// hosts could be picked. A non-retryable request gets exactly one.
    pub fn attempt_budget(&self, eligible: usize, retryable: bool) -> usize {
        if !self.enabled || !retryable {
            return 1;
        }
        let budget = eligible.max(1);
        match self.max_hops {
            Some(hops) => budget.min(hops as usize + 1),
            None => budget,
        }
    }

    /// Only connection-level faults move a request to another host.
    pub fn is_failover_error(&self, error: &ClientError) -> bool {
        error.is_transport()
    }

    pub fn delay_before(&self, hop: u32) -> Duration {
        calculate_backoff(hop, self.base_delay_ms, self.max_delay_ms)
    }

    pub fn begin(&self, eligible: usize, retryable: bool) -> FailoverState {
        FailoverState {
            tried: Vec::new(),
            budget: self.attempt_budget(eligible, retryable),
        }
    }
}

/// Hosts already tried by one request and its remaining budget.
#[derive(Debug)]
pub struct FailoverState {
    tried: Vec<Arc<Host>>,
    budget: usize,
}

impl FailoverState {
    pub fn record(&mut self, host: Arc<Host>) {
        self.tried.push(host);
    }

    /// Hosts the next pick must skip.
    pub fn excluded(&self) -> &[Arc<Host>] {
        &self.tried
    }

    pub fn attempts(&self) -> usize {
        self.tried.len()
    }

    /// Hops taken so far (attempts after the first).
    pub fn hops(&self) -> u32 {
        self.tried.len().saturating_sub(1) as u32
    }

    pub fn can_retry(&self) -> bool {
        self.tried.len() < self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn policy(max_hops: Option<u32>) -> FailoverPolicy {
        FailoverPolicy::from_config(&RetryConfig {
            max_failover_hops: max_hops,
            ..RetryConfig::default()
        })
    }

    #[test]
    fn budget_bounded_by_eligible_hosts() {
        let p = policy(None);
        assert_eq!(p.attempt_budget(3, true), 3);
        assert_eq!(p.attempt_budget(0, true), 1);
        assert_eq!(p.attempt_budget(3, false), 1);
        assert_eq!(policy(Some(1)).attempt_budget(3, true), 2);
        assert_eq!(policy(Some(10)).attempt_budget(3, true), 3);
    }

    #[test]
    fn disabled_retries_get_one_attempt() {
        let p = FailoverPolicy::from_config(&RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        });
        assert_eq!(p.attempt_budget(5, true), 1);
    }

    #[test]
    fn state_tracks_tried_hosts() {
        let mut state = policy(None).begin(3, true);
        assert!(state.can_retry());
        state.record(Arc::new(Host::new("a:1")));
        state.record(Arc::new(Host::new("b:1")));
        assert_eq!(state.hops(), 1);
        assert!(state.can_retry());
        state.record(Arc::new(Host::new("c:1")));
        assert!(!state.can_retry());
        assert_eq!(state.excluded().len(), 3);
    }

    #[test]
    fn only_transport_faults_fail_over() {
        let p = policy(None);
        assert!(p.is_failover_error(&ClientError::Transport(TransportError::Closed)));
        assert!(!p.is_failover_error(&ClientError::Application {
            status: 412,
            error_num: Some(1200),
            message: "conflict".into(),
        }));
        assert!(!p.is_failover_error(&ClientError::Timeout(Duration::from_secs(1))));
    }
}
