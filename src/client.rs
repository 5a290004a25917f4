//! Client facade.
//!
//! # Responsibilities
//! - Validate configuration and assemble the subsystems
//! - Own (or borrow) the runtime every request and background task runs on
//! - Offer blocking and async call styles over one execution mechanism
//! - Control topology auto-refresh and orderly shutdown

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::codec::{decode_as, Codec, JsonCodec};
use crate::config::{validate_config, ClientConfig};
use crate::error::{ClientError, Result};
use crate::execution::handle::Slot;
use crate::execution::{
    Executor, Pipeline, QueueTimeSampler, Request, RequestOptions, Response, ResultHandle,
};
use crate::host::{HostRegistry, HostSnapshot, MergeOutcome, TopologyRefresher};
use crate::lifecycle::Shutdown;
use crate::pool::{ConnectionPool, PoolSettings, PoolStats};
use crate::transport::{self, Transport};

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    runtime: Option<Handle>,
    codec: Option<Arc<dyn Codec>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            runtime: None,
            codec: None,
            transport: None,
        }
    }

    /// Run on a caller-supplied runtime instead of an internal one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Replace the transport selected by `protocol.kind`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Client> {
        let config = self.config;
        validate_config(&config).map_err(ClientError::Configuration)?;

        let (owned, handle) = match self.runtime {
            Some(handle) => (None, handle),
            None => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(config.executor.worker_threads)
                    .thread_name("docwire-worker")
                    .enable_all()
                    .build()
                    .map_err(|e| ClientError::Runtime(e.to_string()))?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
        };

        let registry = Arc::new(HostRegistry::new(
            config.hosts.clone(),
            Duration::from_secs(config.health.recovery_secs),
        ));
        let transport = self.transport.unwrap_or_else(|| {
            transport::from_config(
                &config.protocol,
                Duration::from_millis(config.timeouts.connect_ms),
            )
        });
        let pool = Arc::new(ConnectionPool::new(
            transport,
            PoolSettings::from_config(&config),
        ));
        let queue_times = Arc::new(QueueTimeSampler::new(config.diagnostics.queue_time_samples));
        let pipeline = Arc::new(Pipeline::new(
            &config,
            registry.clone(),
            pool.clone(),
            queue_times.clone(),
        ));
        let topology = Arc::new(TopologyRefresher::new(
            registry,
            pool.clone(),
            config.topology.endpoint_path.clone(),
            vec![(
                config.identity.header_name.to_ascii_lowercase(),
                config.identity.render(config.protocol.kind),
            )],
        ));
        let executor = Executor::new(handle.clone(), config.executor.max_concurrency);
        let shutdown = Shutdown::new();

        handle.spawn(pool.run_reaper(
            Duration::from_millis(config.pool.reaper_interval_ms),
            shutdown.subscribe(),
        ));

        tracing::info!(
            hosts = ?config.hosts,
            protocol = %config.protocol.kind,
            max_connections = config.protocol.max_connections(),
            max_concurrency = config.executor.max_concurrency,
            owned_runtime = owned.is_some(),
            "Client started"
        );

        let client = Client {
            inner: Arc::new(ClientInner {
                pipeline,
                executor,
                codec: self.codec.unwrap_or_else(|| Arc::new(JsonCodec)),
                topology,
                auto_refresh: Mutex::new(None),
                queue_times,
                shutdown,
                shutdown_grace: Duration::from_millis(config.pool.shutdown_grace_ms),
                runtime: Mutex::new(owned),
                config,
            }),
        };
        if client.inner.config.topology.auto_refresh {
            client.set_auto_refresh(
                true,
                Duration::from_secs(client.inner.config.topology.interval_secs),
            );
        }
        Ok(client)
    }
}

struct ClientInner {
    config: ClientConfig,
    pipeline: Arc<Pipeline>,
    executor: Executor,
    codec: Arc<dyn Codec>,
    topology: Arc<TopologyRefresher>,
    auto_refresh: Mutex<Option<JoinHandle<()>>>,
    queue_times: Arc<QueueTimeSampler>,
    shutdown: Shutdown,
    shutdown_grace: Duration,
    runtime: Mutex<Option<Runtime>>,
}

impl ClientInner {
    fn stop_auto_refresh(&self) {
        if let Some(task) = self
            .auto_refresh
            .lock()
            .expect("auto refresh mutex poisoned")
            .take()
        {
            task.abort();
        }
    }

    async fn shutdown(&self) {
        if self.shutdown.is_triggered() {
            return;
        }
        tracing::info!("Client shutting down");
        self.shutdown.trigger();
        self.stop_auto_refresh();
        self.executor.close();
        self.pipeline.pool().shutdown(self.shutdown_grace).await;
        tracing::info!("Client shutdown complete");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.trigger();
        self.stop_auto_refresh();
        self.executor.close();
        let runtime = self.runtime.get_mut().ok().and_then(Option::take);
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

/// Entry point for issuing requests. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("protocol", &self.inner.config.protocol.kind)
            .field("hosts", &self.inner.pipeline.registry().len())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Build a client with an internal runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        ClientBuilder::new(config).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.inner.codec
    }

    /// Submit a request. The handle is returned immediately.
    pub fn execute(&self, request: Request, options: RequestOptions) -> ResultHandle<Response> {
        self.inner.executor.submit(
            self.inner.pipeline.clone(),
            request,
            options,
            |response, _context| Ok(response),
        )
    }

    /// Submit a request and decode a successful body as `T` through the codec.
    pub fn execute_as<T>(&self, request: Request, options: RequestOptions) -> ResultHandle<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let codec = self.inner.codec.clone();
        self.inner.executor.submit(
            self.inner.pipeline.clone(),
            request,
            options,
            move |response, context| decode_as(codec.as_ref(), &response.body, context),
        )
    }

    /// Submit a request and block until it completes.
    ///
    /// Must not be called from inside an async task.
    pub fn execute_sync(&self, request: Request, options: RequestOptions) -> Result<Response> {
        self.execute(request, options).wait()
    }

    /// Query the cluster topology once and merge it into the host registry.
    pub fn refresh_topology(&self) -> ResultHandle<MergeOutcome> {
        let slot = Arc::new(Slot::new());
        let runtime = self.inner.executor.runtime().clone();
        if self.inner.shutdown.is_triggered() {
            slot.resolve(Err(ClientError::PoolClosed));
            return ResultHandle::new(slot, runtime);
        }
        let task_slot = slot.clone();
        let topology = self.inner.topology.clone();
        runtime.spawn(async move {
            task_slot.resolve(topology.refresh().await);
        });
        ResultHandle::new(slot, runtime)
    }

    /// Start or stop periodic topology refresh on the client's runtime.
    pub fn set_auto_refresh(&self, enabled: bool, interval: Duration) {
        let mut task = self
            .inner
            .auto_refresh
            .lock()
            .expect("auto refresh mutex poisoned");
        if let Some(previous) = task.take() {
            previous.abort();
        }
        if enabled && !self.inner.shutdown.is_triggered() {
            let refresher = self.inner.topology.clone();
            let shutdown = self.inner.shutdown.subscribe();
            *task = Some(
                self.inner
                    .executor
                    .runtime()
                    .spawn(refresher.run(interval, shutdown)),
            );
        } else {
            tracing::info!("Topology auto-refresh disabled");
        }
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.inner
            .auto_refresh
            .lock()
            .expect("auto refresh mutex poisoned")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Known hosts with their health.
    pub fn hosts(&self) -> Vec<HostSnapshot> {
        self.inner.pipeline.registry().snapshot()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pipeline.pool().stats()
    }

    /// Most recent connection-acquisition waits, oldest first.
    pub fn queue_times(&self) -> Vec<Duration> {
        self.inner.queue_times.samples()
    }

    /// Requests currently holding an executor permit.
    pub fn active_requests(&self) -> usize {
        self.inner.executor.active()
    }

    /// Stop background work, drain the pool within the configured grace and
    /// refuse further requests. The runtime itself is left running.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Shut down and tear down the internal runtime, if the client owns one.
    ///
    /// Must not be called from inside an async task. With a caller-supplied
    /// runtime the drain is spawned on it and this returns immediately.
    pub fn close(self) {
        let runtime = self
            .inner
            .runtime
            .lock()
            .expect("runtime mutex poisoned")
            .take();
        match runtime {
            Some(runtime) => {
                runtime.block_on(self.inner.shutdown());
                runtime.shutdown_timeout(Duration::from_secs(1));
            }
            None => {
                let inner = self.inner.clone();
                self.inner.executor.runtime().spawn(async move {
                    inner.shutdown().await;
                });
            }
        }
    }
}
