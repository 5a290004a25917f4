//! Result handles.
//!
//! A [`ResultHandle`] resolves exactly once. Blocking callers park on a
//! condvar, async callers on a `Notify`; both observe the same slot.

use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::error::{ClientError, Result};

/// Where a request is in the pipeline. Only ever moves forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPhase {
    Submitted = 0,
    HostSelected = 1,
    ConnectionAcquired = 2,
    Sent = 3,
    Completed = 4,
}

impl From<u8> for RequestPhase {
    fn from(val: u8) -> Self {
        match val {
            0 => RequestPhase::Submitted,
            1 => RequestPhase::HostSelected,
            2 => RequestPhase::ConnectionAcquired,
            3 => RequestPhase::Sent,
            _ => RequestPhase::Completed,
        }
    }
}

/// Phase and cancellation state shared between a handle and its pipeline run.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    phase: AtomicU8,
    cancelled: AtomicBool,
    cancel: Notify,
}

impl Progress {
    pub(crate) fn phase(&self) -> RequestPhase {
        RequestPhase::from(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn advance(&self, phase: RequestPhase) {
        self.phase.fetch_max(phase as u8, Ordering::AcqRel);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.cancel.notify_waiters();
    }

    /// Completes once the request is cancelled.
    pub(crate) async fn cancelled(&self) {
        loop {
            let notified = self.cancel.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct Slot<T> {
    outcome: Mutex<Option<Result<T>>>,
    resolved: AtomicBool,
    ready: Condvar,
    notify: Notify,
    progress: Arc<Progress>,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            resolved: AtomicBool::new(false),
            ready: Condvar::new(),
            notify: Notify::new(),
            progress: Arc::new(Progress::default()),
        }
    }

    pub(crate) fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// Store the outcome. Returns false if the slot was already resolved.
    pub(crate) fn resolve(&self, outcome: Result<T>) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.outcome.lock().expect("result slot mutex poisoned") = Some(outcome);
        self.progress.advance(RequestPhase::Completed);
        self.ready.notify_all();
        self.notify.notify_waiters();
        true
    }

    fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<Result<T>> {
        self.outcome.lock().expect("result slot mutex poisoned").take()
    }

    fn wait_blocking(&self) -> Result<T> {
        let mut outcome = self.outcome.lock().expect("result slot mutex poisoned");
        loop {
            if let Some(result) = outcome.take() {
                return result;
            }
            outcome = self
                .ready
                .wait(outcome)
                .expect("result slot mutex poisoned");
        }
    }

    async fn wait_async(&self) -> Result<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(result) = self.take() {
                return result;
            }
            notified.await;
        }
    }
}

/// The pending outcome of one `execute` call.
///
/// Await it, block on it with [`wait`](Self::wait), or chain a
/// continuation with [`then`](Self::then).
pub struct ResultHandle<T> {
    slot: Arc<Slot<T>>,
    runtime: Handle,
}

impl<T> std::fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("phase", &self.slot.progress.phase())
            .field("resolved", &self.slot.is_resolved())
            .finish()
    }
}

impl<T: Send + 'static> ResultHandle<T> {
    pub(crate) fn new(slot: Arc<Slot<T>>, runtime: Handle) -> Self {
        Self { slot, runtime }
    }

    pub fn phase(&self) -> RequestPhase {
        self.slot.progress.phase()
    }

    pub fn is_finished(&self) -> bool {
        self.slot.is_resolved()
    }

    /// Cancel the request.
    ///
    /// Before the request is sent it is abandoned without touching the wire.
    /// Afterwards the request runs to completion and its result is dropped.
    /// Either way the handle resolves to [`ClientError::Cancelled`] unless it
    /// already resolved.
    pub fn cancel(&self) -> bool {
        if self.slot.is_resolved() {
            return false;
        }
        self.slot.progress.cancel();
        self.slot.resolve(Err(ClientError::Cancelled))
    }

    /// Block the current thread until the outcome is available.
    ///
    /// Must not be called from inside an async task; await the handle there.
    pub fn wait(self) -> Result<T> {
        self.slot.wait_blocking()
    }

    /// Run `f` on the outcome as a new task on the client's runtime.
    pub fn then<U, F, Fut>(self, f: F) -> ResultHandle<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        let slot = Arc::new(Slot::new());
        let next = ResultHandle::new(slot.clone(), self.runtime.clone());
        let runtime = self.runtime.clone();
        runtime.spawn(async move {
            let outcome = self.await;
            slot.resolve(f(outcome).await);
        });
        next
    }
}

impl<T: Send + 'static> IntoFuture for ResultHandle<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.slot.wait_async().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle<T: Send + 'static>() -> (Arc<Slot<T>>, ResultHandle<T>) {
        let slot = Arc::new(Slot::new());
        (slot.clone(), ResultHandle::new(slot, Handle::current()))
    }

    #[tokio::test]
    async fn test_resolves_exactly_once() {
        let (slot, handle) = handle::<u32>();
        assert!(slot.resolve(Ok(1)));
        assert!(!slot.resolve(Ok(2)));
        assert!(!slot.resolve(Err(ClientError::Cancelled)));
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_phase_is_monotonic() {
        let (slot, handle) = handle::<()>();
        slot.progress().advance(RequestPhase::Sent);
        slot.progress().advance(RequestPhase::HostSelected);
        assert_eq!(handle.phase(), RequestPhase::Sent);
        slot.resolve(Ok(()));
        assert_eq!(handle.phase(), RequestPhase::Completed);
    }

    #[tokio::test]
    async fn test_debug_shows_phase_without_payload_bound() {
        struct Opaque;
        let (slot, handle) = handle::<Opaque>();
        slot.progress().advance(RequestPhase::HostSelected);
        let rendered = format!("{handle:?}");
        assert!(rendered.contains("HostSelected"), "{rendered}");
        assert!(rendered.contains("resolved: false"), "{rendered}");
    }

    #[tokio::test]
    async fn test_cancel_before_resolution() {
        let (slot, handle) = handle::<u32>();
        assert!(handle.cancel());
        assert!(slot.progress().is_cancelled());
        assert!(!slot.resolve(Ok(5)));
        assert!(matches!(handle.await, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_after_resolution_is_noop() {
        let (slot, handle) = handle::<u32>();
        slot.resolve(Ok(3));
        assert!(!handle.cancel());
        assert_eq!(handle.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_then_runs_as_task() {
        let (slot, handle) = handle::<u32>();
        let chained = handle.then(|r| async move { r.map(|v| v * 10) });
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            slot.resolve(Ok(4));
        });
        assert_eq!(chained.await.unwrap(), 40);
    }

    #[test]
    fn test_wait_blocks_until_resolved() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let slot = Arc::new(Slot::new());
        let handle = ResultHandle::new(slot.clone(), runtime.handle().clone());
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            slot.resolve(Ok("done"));
        });
        assert_eq!(handle.wait().unwrap(), "done");
    }
}
