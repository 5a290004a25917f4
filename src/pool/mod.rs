//! Connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline: pool.acquire(host)
//!     → DashMap shard → HostPool (one mutex per host)
//!         - connection with spare capacity (idle first, then least loaded)
//!         - else open one while under max_connections
//!         - else wait for a release until acquire_timeout
//!     → PooledConnection (RAII, weak ref to its HostPool)
//!     → drop releases the slot and wakes one waiter
//!
//! reaper (interval):
//!     → close idle connections past TTL
//!     → probe idle connections past keep_alive_interval
//! ```

mod host_pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::Transport;

use host_pool::HostPool;
pub use host_pool::{HostPoolStats, PooledConnection};

/// Budgets and lifetimes applied to every host pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub max_in_flight: usize,
    pub acquire_timeout: Duration,
    pub connection_ttl: Option<Duration>,
    pub keep_alive_interval: Option<Duration>,
    pub probe_path: String,
}

impl PoolSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_connections: config.protocol.max_connections(),
            max_in_flight: config.protocol.max_in_flight(),
            acquire_timeout: Duration::from_millis(config.pool.acquire_timeout_ms),
            connection_ttl: config.pool.connection_ttl(),
            keep_alive_interval: config.pool.keep_alive_interval(),
            probe_path: config.health.probe_path.clone(),
        }
    }
}

/// Pool-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hosts: Vec<HostPoolStats>,
}

impl PoolStats {
    pub fn open(&self) -> usize {
        self.hosts.iter().map(|h| h.open).sum()
    }

    pub fn in_flight(&self) -> usize {
        self.hosts.iter().map(|h| h.in_flight).sum()
    }

    pub fn host(&self, address: &str) -> Option<&HostPoolStats> {
        self.hosts.iter().find(|h| h.address == address)
    }
}

/// Per-host bounded connection sets, sharded by host address.
pub struct ConnectionPool {
    hosts: DashMap<String, Arc<HostPool>>,
    transport: Arc<dyn Transport>,
    settings: Arc<PoolSettings>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("protocol", &self.transport.protocol())
            .field("hosts", &self.hosts.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(transport: Arc<dyn Transport>, settings: PoolSettings) -> Self {
        Self {
            hosts: DashMap::new(),
            transport,
            settings: Arc::new(settings),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn host_pool(&self, address: &str) -> Arc<HostPool> {
        if let Some(pool) = self.hosts.get(address) {
            return pool.clone();
        }
        self.hosts
            .entry(address.to_string())
            .or_insert_with(|| {
                Arc::new(HostPool::new(
                    address.to_string(),
                    self.settings.clone(),
                    self.transport.clone(),
                ))
            })
            .clone()
    }

    /// Reserve an in-flight slot on a connection to `address`.
    pub async fn acquire(&self, address: &str) -> Result<PooledConnection, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::PoolClosed);
        }
        let pool = self.host_pool(address);
        pool.acquire().await
    }

    pub fn stats(&self) -> PoolStats {
        let mut hosts: Vec<HostPoolStats> = self.hosts.iter().map(|e| e.value().stats()).collect();
        hosts.sort_by(|a, b| a.address.cmp(&b.address));
        PoolStats { hosts }
    }

    /// Drop the pool of a host that left the topology. Idle connections close
    /// now, busy ones when their requests finish.
    pub fn remove_host(&self, address: &str) {
        if let Some((_, pool)) = self.hosts.remove(address) {
            tracing::debug!(host = %address, "Removing host pool");
            pool.close_acquisitions();
            pool.retire_idle();
        }
    }

    /// One reaper pass over every host.
    pub async fn reap(&self) {
        let pools: Vec<Arc<HostPool>> = self.hosts.iter().map(|e| e.value().clone()).collect();
        for pool in pools {
            pool.reap().await;
        }
    }

    /// Run the reaper until shutdown.
    pub async fn run_reaper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.closed.load(Ordering::Acquire) {
                        break;
                    }
                    self.reap().await;
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Pool reaper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Stop new acquisitions, let in-flight requests finish for up to
    /// `grace`, then close everything.
    pub async fn shutdown(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pools: Vec<Arc<HostPool>> = self.hosts.iter().map(|e| e.value().clone()).collect();
        for pool in &pools {
            pool.close_acquisitions();
        }

        let started = Instant::now();
        loop {
            let in_flight: usize = pools.iter().map(|p| p.in_flight()).sum();
            if in_flight == 0 {
                break;
            }
            if started.elapsed() >= grace {
                tracing::warn!(in_flight, "Shutdown grace elapsed, closing busy connections");
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }

        for pool in &pools {
            pool.force_close();
            tracing::debug!(host = %pool.address(), "Host pool closed");
        }
        self.hosts.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
