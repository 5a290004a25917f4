//! Request executor.
//!
//! Every submitted request runs as its own task on the client's runtime and
//! holds one of `max_concurrency` permits while it is processed. The permit
//! count is independent of the pool's per-host connection budget.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::codec::SerdeContext;
use crate::error::{ClientError, Result};
use crate::execution::handle::{ResultHandle, Slot};
use crate::execution::pipeline::Pipeline;
use crate::execution::{Request, RequestOptions, Response};

#[derive(Debug)]
pub struct Executor {
    runtime: Handle,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl Executor {
    pub fn new(runtime: Handle, max_concurrency: usize) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Requests currently holding a permit.
    pub fn active(&self) -> usize {
        self.max_concurrency - self.permits.available_permits()
    }

    /// Submit a request. `finish` turns the response into the handle's value
    /// after the connection and the permit were released.
    pub(crate) fn submit<T, F>(
        &self,
        pipeline: Arc<Pipeline>,
        request: Request,
        options: RequestOptions,
        finish: F,
    ) -> ResultHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Response, &SerdeContext) -> Result<T> + Send + 'static,
    {
        let slot = Arc::new(Slot::new());
        if self.permits.is_closed() {
            slot.resolve(Err(ClientError::PoolClosed));
            return ResultHandle::new(slot, self.runtime.clone());
        }
        let task_slot = slot.clone();
        let permits = self.permits.clone();

        self.runtime.spawn(async move {
            let progress = task_slot.progress().clone();
            let outcome = async {
                let permit = tokio::select! {
                    permit = permits.acquire_owned() => permit.map_err(|_| ClientError::PoolClosed)?,
                    _ = progress.cancelled() => return Err(ClientError::Cancelled),
                };
                let context = SerdeContext::new(options.transaction_id().map(str::to_owned));
                let result = pipeline.run(&request, &options, &progress).await;
                drop(permit);
                finish(result?, &context)
            }
            .await;
            task_slot.resolve(outcome);
        });

        ResultHandle::new(slot, self.runtime.clone())
    }

    /// Refuse new work. Requests already holding a permit finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}
