//! Connections to a single host.
//!
//! One short mutex guards the slot list and the count of opens in progress,
//! so acquisition and release are linearizable per host. In-flight counts
//! live on each connection and are reserved with a CAS, which keeps every
//! connection at or below its protocol limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::{ClientError, TransportError};
use crate::execution::{Response, WireRequest};
use crate::net::Connection;
use crate::observability::metrics;
use crate::pool::PoolSettings;
use crate::transport::Transport;

/// Per-host connection counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPoolStats {
    pub address: String,
    pub open: usize,
    pub idle: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct Slots {
    connections: Vec<Arc<Connection>>,
    opening: usize,
}

impl Slots {
    fn prune(&mut self) {
        self.connections.retain(|c| !c.is_closed());
    }

    /// Reserve a slot on an existing connection: idle first, then least loaded.
    fn reserve(&self) -> Option<Arc<Connection>> {
        let mut candidates: Vec<&Arc<Connection>> = self.connections.iter().collect();
        candidates.sort_by_key(|c| c.in_flight());
        candidates
            .into_iter()
            .find(|c| c.try_reserve())
            .cloned()
    }
}

enum Next {
    Ready(Arc<Connection>),
    Open,
    Wait,
}

pub(crate) struct HostPool {
    address: String,
    settings: Arc<PoolSettings>,
    transport: Arc<dyn Transport>,
    slots: Mutex<Slots>,
    released: Notify,
    closed: AtomicBool,
}

impl HostPool {
    pub(crate) fn new(
        address: String,
        settings: Arc<PoolSettings>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            address,
            settings,
            transport,
            slots: Mutex::new(Slots::default()),
            released: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().expect("host pool mutex poisoned")
    }

    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, ClientError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.acquire_timeout;

        loop {
            // Register interest before inspecting the slots so a release
            // between the check and the wait is not lost.
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return Err(ClientError::PoolClosed);
            }

            let next = {
                let mut slots = self.slots();
                slots.prune();
                if let Some(connection) = slots.reserve() {
                    Next::Ready(connection)
                } else if slots.connections.len() + slots.opening < self.settings.max_connections {
                    slots.opening += 1;
                    Next::Open
                } else {
                    Next::Wait
                }
            };

            match next {
                Next::Ready(connection) => {
                    return Ok(PooledConnection::new(connection, self, started.elapsed()));
                }
                Next::Open => {
                    let connection = self.open().await?;
                    return Ok(PooledConnection::new(connection, self, started.elapsed()));
                }
                Next::Wait => {
                    if self.settings.acquire_timeout.is_zero() {
                        return Err(ClientError::PoolExhausted {
                            address: self.address.clone(),
                        });
                    }
                    if tokio::time::timeout_at(deadline, released).await.is_err() {
                        tracing::debug!(
                            host = %self.address,
                            waited_ms = started.elapsed().as_millis() as u64,
                            "Timed out waiting for a pooled connection"
                        );
                        return Err(ClientError::AcquireTimeout {
                            address: self.address.clone(),
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }
    }

    /// Open a new connection with one slot already reserved.
    async fn open(self: &Arc<Self>) -> Result<Arc<Connection>, ClientError> {
        let _opening = OpeningSlot { pool: self };
        let channel = self.transport.open(&self.address).await.inspect_err(|e| {
            tracing::debug!(host = %self.address, error = %e, "Failed to open connection");
        })?;

        let connection = Arc::new(Connection::new(
            self.transport.protocol(),
            self.address.clone(),
            self.settings.max_in_flight,
            channel,
        ));
        connection.try_reserve();

        let open = {
            let mut slots = self.slots();
            slots.connections.push(connection.clone());
            slots.connections.len()
        };
        tracing::debug!(
            host = %self.address,
            connection_id = %connection.id(),
            open,
            "Opened connection"
        );
        metrics::record_pool_connections(&self.address, open);

        if self.closed.load(Ordering::Acquire) {
            self.retire(&connection);
            return Err(ClientError::PoolClosed);
        }
        Ok(connection)
    }

    fn release(&self, connection: &Arc<Connection>, remaining: usize, discard: bool) {
        let expired = remaining == 0 && connection.is_expired(self.settings.connection_ttl);
        if discard || expired || self.closed.load(Ordering::Acquire) {
            if expired {
                tracing::debug!(host = %self.address, connection_id = %connection.id(), "Connection past TTL");
            }
            self.retire(connection);
        }
        self.released.notify_one();
    }

    /// Take a connection out of rotation. It closes once its last holder is done.
    fn retire(&self, connection: &Arc<Connection>) {
        let open = {
            let mut slots = self.slots();
            slots.connections.retain(|c| !Arc::ptr_eq(c, connection));
            slots.connections.len()
        };
        if connection.in_flight() == 0 {
            connection.close();
        }
        metrics::record_pool_connections(&self.address, open);
    }

    pub(crate) fn stats(&self) -> HostPoolStats {
        let slots = self.slots();
        let open = slots.connections.iter().filter(|c| !c.is_closed()).count();
        let in_flight = slots.connections.iter().map(|c| c.in_flight()).sum();
        let idle = slots
            .connections
            .iter()
            .filter(|c| !c.is_closed() && c.in_flight() == 0)
            .count();
        HostPoolStats {
            address: self.address.clone(),
            open,
            idle,
            in_flight,
        }
    }

    /// Close idle connections past their TTL and probe those idle past the
    /// keep-alive interval.
    pub(crate) async fn reap(&self) {
        let (expired, stale) = {
            let mut slots = self.slots();
            slots.prune();
            let mut expired = Vec::new();
            let mut stale = Vec::new();
            for connection in &slots.connections {
                if connection.in_flight() > 0 {
                    continue;
                }
                if connection.is_expired(self.settings.connection_ttl) {
                    expired.push(connection.clone());
                } else if self
                    .settings
                    .keep_alive_interval
                    .is_some_and(|interval| connection.idle_for() >= interval)
                    && connection.try_reserve()
                {
                    stale.push(connection.clone());
                }
            }
            (expired, stale)
        };

        for connection in expired {
            tracing::debug!(host = %self.address, connection_id = %connection.id(), "Reaping expired connection");
            self.retire(&connection);
        }

        for connection in stale {
            let result = connection.probe(&self.settings.probe_path).await;
            connection.finish();
            match result {
                Ok(()) => {
                    tracing::trace!(host = %self.address, connection_id = %connection.id(), "Keep-alive probe ok");
                }
                Err(e) => {
                    tracing::debug!(
                        host = %self.address,
                        connection_id = %connection.id(),
                        error = %e,
                        "Keep-alive probe failed, closing connection"
                    );
                    self.retire(&connection);
                }
            }
            self.released.notify_one();
        }
    }

    /// Stop handing out connections and wake every waiter.
    pub(crate) fn close_acquisitions(&self) {
        self.closed.store(true, Ordering::Release);
        self.released.notify_waiters();
    }

    /// Close connections with nothing in flight. Busy ones are retired on
    /// release once acquisitions are closed.
    pub(crate) fn retire_idle(&self) {
        let idle: Vec<Arc<Connection>> = self
            .slots()
            .connections
            .iter()
            .filter(|c| c.in_flight() == 0)
            .cloned()
            .collect();
        for connection in idle {
            self.retire(&connection);
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.slots().connections.iter().map(|c| c.in_flight()).sum()
    }

    pub(crate) fn force_close(&self) {
        let connections = std::mem::take(&mut self.slots().connections);
        for connection in &connections {
            connection.close();
        }
        metrics::record_pool_connections(&self.address, 0);
    }
}

/// Keeps the open-in-progress count honest if the opening future is dropped.
struct OpeningSlot<'a> {
    pool: &'a HostPool,
}

impl Drop for OpeningSlot<'_> {
    fn drop(&mut self) {
        self.pool.slots().opening -= 1;
        // A new multiplexed connection has room for every waiter.
        self.pool.released.notify_waiters();
    }
}

/// A reserved in-flight slot on a pooled connection.
///
/// Dropping the guard releases the slot. The guard only holds a weak
/// reference to its host pool, so it never keeps a shut-down pool alive.
pub struct PooledConnection {
    connection: Arc<Connection>,
    pool: Weak<HostPool>,
    waited: Duration,
    sending: bool,
    discard: bool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .field("waited", &self.waited)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    fn new(connection: Arc<Connection>, pool: &Arc<HostPool>, waited: Duration) -> Self {
        Self {
            connection,
            pool: Arc::downgrade(pool),
            waited,
            sending: false,
            discard: false,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Time spent waiting in `acquire`.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub async fn send(&mut self, request: WireRequest) -> Result<Response, TransportError> {
        self.sending = true;
        let result = self.connection.send(request).await;
        self.sending = false;
        if result.is_err() {
            self.discard = true;
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let remaining = self.connection.finish();
        match self.pool.upgrade() {
            Some(pool) => {
                // A send abandoned mid-exchange may leave the stream dirty.
                let dirty = self.sending && !pool.transport.recovers_from_timeout();
                pool.release(&self.connection, remaining, self.discard || dirty);
            }
            None => self.connection.close(),
        }
    }
}
