//! Multiplexed protocol transport (HTTP/2 with prior knowledge).
//!
//! Many requests share one connection, each on its own stream. A single
//! connection can absorb the whole per-host budget, so the default budget
//! for this variant is one connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::task::JoinHandle;

use crate::config::Protocol;
use crate::error::TransportError;
use crate::execution::{Response, WireRequest};
use crate::net::TcpConnector;
use crate::transport::{http, Channel, Transport};

#[derive(Debug)]
pub struct MultiplexedTransport {
    connector: TcpConnector,
}

impl MultiplexedTransport {
    pub fn new(connector: TcpConnector) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Transport for MultiplexedTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Multiplexed
    }

    async fn open(&self, address: &str) -> Result<Box<dyn Channel>, TransportError> {
        let stream = self.connector.connect(address).await?;
        let (sender, connection) = http2::Builder::new(TokioExecutor::new())
            .handshake::<_, Body>(TokioIo::new(stream))
            .await?;

        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let host = address.to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(host = %host, error = %e, "HTTP/2 connection ended with error");
            }
            flag.store(true, Ordering::Release);
        });

        Ok(Box::new(MultiplexedChannel {
            authority: address.to_string(),
            sender: Mutex::new(sender),
            closed,
            driver,
        }))
    }

    // Dropping an in-flight stream resets only that stream.
    fn recovers_from_timeout(&self) -> bool {
        true
    }
}

struct MultiplexedChannel {
    authority: String,
    sender: Mutex<http2::SendRequest<Body>>,
    closed: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

#[async_trait]
impl Channel for MultiplexedChannel {
    async fn send(&self, request: WireRequest) -> Result<Response, TransportError> {
        let mut sender = self
            .sender
            .lock()
            .expect("http2 sender mutex poisoned")
            .clone();
        sender.ready().await?;
        let uri = format!("http://{}{}", self.authority, request.path);
        let request = http::build_request(request, &uri, None)?;
        let response = sender.send_request(request).await?;
        http::read_response(response).await
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.driver.is_finished()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.driver.abort();
    }
}

impl Drop for MultiplexedChannel {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
