//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! run(request, options)
//!     → prepare (identity, transaction and encoding headers, compression)
//!     → loop:
//!         pick host (excluding hosts already tried)   [HostSelected]
//!         pool.acquire(host), record queue time        [ConnectionAcquired]
//!         connection.send                              [Sent]
//!         connection released
//!         transport fault → mark host unhealthy, fail over within budget
//!     → decompress (failure is a Serialization error, never retried)
//!     → status >= 400 → ClientError::Application
//! ```
//!
//! The whole run is bounded by the overall request timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use tokio::time;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ClientConfig, Protocol};
use crate::error::{ClientError, Result};
use crate::execution::handle::{Progress, RequestPhase};
use crate::execution::queue_time::QueueTimeSampler;
use crate::execution::{Request, RequestOptions, Response, WireRequest};
use crate::host::{Host, HostRegistry};
use crate::load_balancer::{self, LoadBalancer};
use crate::observability::metrics;
use crate::pool::ConnectionPool;
use crate::resilience::FailoverPolicy;
use crate::transport::compression::{decompress_response, Compressor, ACCEPT_ENCODING};

/// Header carrying the stream transaction id.
pub const TRANSACTION_HEADER: &str = "x-docwire-trx-id";

/// Headers the transports manage themselves.
const RESERVED_HEADERS: &[&str] = &["host", "content-length", "transfer-encoding", "connection"];

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorNum")]
    error_num: Option<i64>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// Turn a well-formed rejection (status >= 400) into an application error.
pub fn check_status(response: Response) -> Result<Response> {
    if response.status < 400 {
        return Ok(response);
    }
    let parsed = serde_json::from_slice::<ErrorBody>(&response.body).ok();
    let error_num = parsed.as_ref().and_then(|b| b.error_num);
    let message = parsed
        .and_then(|b| b.error_message)
        .or_else(|| {
            let text = String::from_utf8_lossy(&response.body).trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .unwrap_or_else(|| format!("status {}", response.status));
    Err(ClientError::Application {
        status: response.status,
        error_num,
        message,
    })
}

fn outcome_label(result: &Result<Response>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(ClientError::Application { .. }) => "application_error",
        Err(ClientError::Transport(_)) => "transport_error",
        Err(ClientError::Timeout(_)) => "timeout",
        Err(ClientError::Cancelled) => "cancelled",
        Err(_) => "error",
    }
}

pub struct Pipeline {
    registry: Arc<HostRegistry>,
    balancer: Arc<dyn LoadBalancer>,
    pool: Arc<ConnectionPool>,
    failover: FailoverPolicy,
    compressor: Compressor,
    identity: (String, String),
    request_timeout: Duration,
    queue_times: Arc<QueueTimeSampler>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("balancer", &self.balancer)
            .field("failover", &self.failover)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        config: &ClientConfig,
        registry: Arc<HostRegistry>,
        pool: Arc<ConnectionPool>,
        queue_times: Arc<QueueTimeSampler>,
    ) -> Self {
        Self {
            registry,
            balancer: load_balancer::from_strategy(config.load_balancing),
            pool,
            failover: FailoverPolicy::from_config(&config.retries),
            compressor: Compressor::new(config.compression.clone()),
            identity: identity_header(config),
            request_timeout: Duration::from_millis(config.timeouts.request_ms),
            queue_times,
        }
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub(crate) async fn run(
        &self,
        request: &Request,
        options: &RequestOptions,
        progress: &Progress,
    ) -> Result<Response> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.path(),
        );
        let timeout = options.request_timeout().unwrap_or(self.request_timeout);

        let result = async {
            let wire = self.prepare(request, options)?;
            match time::timeout(timeout, self.dispatch(wire, request.is_retryable(), progress)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Request timed out");
                    Err(ClientError::Timeout(timeout))
                }
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| match &result {
            Ok(response) => tracing::debug!(status = response.status, elapsed_ms = started.elapsed().as_millis() as u64, "Request completed"),
            Err(e) => tracing::debug!(error = %e, elapsed_ms = started.elapsed().as_millis() as u64, "Request failed"),
        });
        metrics::record_request(request.method().as_str(), outcome_label(&result), started);
        result
    }

    /// Build the wire form of `request`.
    pub fn prepare(&self, request: &Request, options: &RequestOptions) -> Result<WireRequest> {
        if !request.path().starts_with('/') {
            return Err(ClientError::InvalidRequest(format!(
                "path '{}' must start with '/'",
                request.path()
            )));
        }

        let mut headers = Vec::with_capacity(request.headers().len() + 3);
        for (name, value) in request.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientError::InvalidRequest(format!("invalid header name '{name}'")))?;
            HeaderValue::from_str(value).map_err(|_| {
                ClientError::InvalidRequest(format!("invalid value for header '{name}'"))
            })?;
            if RESERVED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.push((name.as_str().to_string(), value.clone()));
        }

        headers.push(self.identity.clone());
        if let Some(trx) = options.transaction_id() {
            HeaderValue::from_str(trx).map_err(|_| {
                ClientError::InvalidRequest("invalid transaction id".to_string())
            })?;
            headers.push((TRANSACTION_HEADER.to_string(), trx.to_string()));
        }
        if let Some(encoding) = self.compressor.accept_encoding() {
            if !headers.iter().any(|(k, _)| k == ACCEPT_ENCODING) {
                headers.push((ACCEPT_ENCODING.to_string(), encoding.to_string()));
            }
        }

        let mut wire = WireRequest {
            method: request.method(),
            path: request.path().to_string(),
            headers,
            body: request.body_bytes().clone(),
        };
        self.compressor
            .compress_request(&mut wire)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;
        Ok(wire)
    }

    async fn dispatch(
        &self,
        wire: WireRequest,
        retryable: bool,
        progress: &Progress,
    ) -> Result<Response> {
        let mut state = self
            .failover
            .begin(self.registry.eligible_count(), retryable);
        let mut last_error: Option<ClientError> = None;

        loop {
            if progress.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let hosts = self.registry.hosts();
            let Some(host) = load_balancer::pick(
                self.balancer.as_ref(),
                &hosts,
                state.excluded(),
                self.registry.recovery(),
            ) else {
                return Err(last_error.unwrap_or(ClientError::NoAvailableHost));
            };
            progress.advance(RequestPhase::HostSelected);
            state.record(host.clone());

            match self.attempt(&host, wire.clone(), progress).await {
                Ok(mut response) => {
                    self.registry.mark_healthy(&host);
                    decompress_response(&mut response)?;
                    return check_status(response);
                }
                Err(e) if self.failover.is_failover_error(&e) => {
                    self.registry.mark_unhealthy(&host);
                    if !state.can_retry() {
                        if state.attempts() > 1 {
                            tracing::warn!(attempts = state.attempts(), error = %e, "Failover budget exhausted");
                        }
                        return Err(e);
                    }
                    metrics::record_failover(host.address());
                    tracing::info!(
                        host = %host.address(),
                        attempt = state.attempts(),
                        error = %e,
                        "Transport failure, failing over"
                    );
                    let delay = self.failover.delay_before(state.hops() + 1);
                    if !delay.is_zero() {
                        time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, host: &Host, wire: WireRequest, progress: &Progress) -> Result<Response> {
        let mut connection = tokio::select! {
            connection = self.pool.acquire(host.address()) => connection?,
            _ = progress.cancelled() => return Err(ClientError::Cancelled),
        };
        let waited = connection.waited();
        self.queue_times.record(waited);
        metrics::record_queue_wait(host.address(), waited);
        progress.advance(RequestPhase::ConnectionAcquired);

        if progress.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        tracing::trace!(
            host = %host.address(),
            connection_id = %connection.connection().id(),
            "Sending request"
        );
        progress.advance(RequestPhase::Sent);
        let response = connection.send(wire).await;
        drop(connection);
        Ok(response?)
    }
}

fn identity_header(config: &ClientConfig) -> (String, String) {
    let protocol: Protocol = config.protocol.kind;
    (
        config.identity.header_name.to_ascii_lowercase(),
        config.identity.render(protocol),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport;
    use bytes::Bytes;
    use std::collections::BTreeMap;

    fn pipeline(config: &ClientConfig) -> Pipeline {
        let registry = Arc::new(HostRegistry::new(config.hosts.clone(), Duration::from_secs(30)));
        let transport = transport::from_config(&config.protocol, Duration::from_millis(100));
        let pool = Arc::new(ConnectionPool::new(
            transport,
            crate::pool::PoolSettings::from_config(config),
        ));
        Pipeline::new(config, registry, pool, Arc::new(QueueTimeSampler::new(4)))
    }

    fn response(status: u16, body: &'static [u8]) -> Response {
        Response {
            status,
            headers: BTreeMap::new(),
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn rejection_carries_server_error_fields() {
        let err = check_status(response(
            412,
            br#"{"error":true,"code":412,"errorNum":1200,"errorMessage":"conflict, _rev values do not match"}"#,
        ))
        .unwrap_err();
        match err {
            ClientError::Application {
                status,
                error_num,
                message,
            } => {
                assert_eq!(status, 412);
                assert_eq!(error_num, Some(1200));
                assert_eq!(message, "conflict, _rev values do not match");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejection_without_json_body_keeps_text() {
        let err = check_status(response(503, b"upstream overloaded")).unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("upstream overloaded"));
        assert!(check_status(response(204, b"")).is_ok());
    }

    #[tokio::test]
    async fn prepare_adds_identity_and_transaction_headers() {
        let config = ClientConfig::default();
        let p = pipeline(&config);
        let wire = p
            .prepare(
                &Request::get("/_api/version").header("X-Custom", "1"),
                &RequestOptions::new().transaction("4711"),
            )
            .unwrap();

        let get = |name: &str| {
            wire.headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("x-custom"), Some("1"));
        assert_eq!(get(TRANSACTION_HEADER), Some("4711"));
        let identity = get("x-docwire-driver").unwrap();
        assert!(identity.starts_with("docwire/"));
        assert!(identity.contains("text"));
    }

    #[tokio::test]
    async fn prepare_rejects_invalid_headers_and_paths() {
        let p = pipeline(&ClientConfig::default());
        let opts = RequestOptions::new();
        assert!(matches!(
            p.prepare(&Request::get("/x").header("bad header", "v"), &opts),
            Err(ClientError::InvalidRequest(_))
        ));
        assert!(matches!(
            p.prepare(&Request::get("/x").header("x-ok", "line\nbreak"), &opts),
            Err(ClientError::InvalidRequest(_))
        ));
        assert!(matches!(
            p.prepare(&Request::get("no-slash"), &opts),
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn prepare_strips_transport_managed_headers() {
        let p = pipeline(&ClientConfig::default());
        let wire = p
            .prepare(
                &Request::post("/_api/cursor")
                    .header("Content-Length", "999")
                    .header("Host", "elsewhere")
                    .body("{}"),
                &RequestOptions::new(),
            )
            .unwrap();
        assert!(wire
            .headers
            .iter()
            .all(|(k, _)| k != "content-length" && k != "host"));
    }
}
