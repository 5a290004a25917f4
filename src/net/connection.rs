//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Idle → Busy → Closed)
//! - Generate unique connection IDs for tracing
//! - Enforce the per-connection in-flight limit
//! - Record age and idle time for TTL and keep-alive decisions

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::Protocol;
use crate::error::TransportError;
use crate::execution::{Response, WireRequest};
use crate::transport::Channel;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open with no request in flight.
    Idle,
    /// At least one request in flight.
    Busy,
    /// Closed locally or by the peer.
    Closed,
}

/// One logical channel to one host.
pub struct Connection {
    id: ConnectionId,
    protocol: Protocol,
    host: String,
    created_at: Instant,
    last_used: Mutex<Instant>,
    in_flight: AtomicUsize,
    max_in_flight: usize,
    closed: AtomicBool,
    channel: Box<dyn Channel>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        protocol: Protocol,
        host: impl Into<String>,
        max_in_flight: usize,
        channel: Box<dyn Channel>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            protocol,
            host: host.into(),
            created_at: now,
            last_used: Mutex::new(now),
            in_flight: AtomicUsize::new(0),
            max_in_flight: max_in_flight.max(1),
            closed: AtomicBool::new(false),
            channel,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().expect("connection mutex poisoned")
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else if self.in_flight() > 0 {
            ConnectionState::Busy
        } else {
            ConnectionState::Idle
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || !self.channel.is_open()
    }

    /// Older than `ttl`, when one is set.
    pub fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.created_at.elapsed() >= ttl)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used().elapsed()
    }

    /// Claim an in-flight slot. Fails at the protocol limit or when closed.
    pub(crate) fn try_reserve(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut prev = self.in_flight.load(Ordering::Acquire);
        loop {
            if prev >= self.max_in_flight {
                return false;
            }
            match self.in_flight.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(x) => prev = x,
            }
        }
    }

    /// Return an in-flight slot. Returns the remaining count.
    pub(crate) fn finish(&self) -> usize {
        *self.last_used.lock().expect("connection mutex poisoned") = Instant::now();
        let prev = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        prev.saturating_sub(1)
    }

    pub async fn send(&self, request: WireRequest) -> Result<Response, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.channel.send(request).await
    }

    pub async fn probe(&self, path: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.channel.probe(path).await
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.channel.close();
            tracing::trace!(connection_id = %self.id, host = %self.host, "Connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
