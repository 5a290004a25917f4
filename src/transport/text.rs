//! Text protocol transport (HTTP/1.1).
//!
//! Exactly one request is in flight per connection; requests are never
//! pipelined. Parallelism comes only from the pool's connection budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::task::JoinHandle;

use crate::config::Protocol;
use crate::error::TransportError;
use crate::execution::{Response, WireRequest};
use crate::net::TcpConnector;
use crate::transport::{http, Channel, Transport};

#[derive(Debug)]
pub struct TextTransport {
    connector: TcpConnector,
}

impl TextTransport {
    pub fn new(connector: TcpConnector) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Transport for TextTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Text
    }

    async fn open(&self, address: &str) -> Result<Box<dyn Channel>, TransportError> {
        let stream = self.connector.connect(address).await?;
        let (sender, connection) = http1::handshake::<_, Body>(TokioIo::new(stream)).await?;

        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let host = address.to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(host = %host, error = %e, "HTTP/1.1 connection ended with error");
            }
            flag.store(true, Ordering::Release);
        });

        Ok(Box::new(TextChannel {
            authority: address.to_string(),
            sender: tokio::sync::Mutex::new(sender),
            closed,
            driver,
        }))
    }

    // An abandoned HTTP/1.1 exchange leaves unread bytes on the socket.
    fn recovers_from_timeout(&self) -> bool {
        false
    }
}

struct TextChannel {
    authority: String,
    // The lock serializes requests even if a caller bypasses the pool limit.
    sender: tokio::sync::Mutex<http1::SendRequest<Body>>,
    closed: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

#[async_trait]
impl Channel for TextChannel {
    async fn send(&self, request: WireRequest) -> Result<Response, TransportError> {
        let mut sender = self.sender.lock().await;
        sender.ready().await?;
        let path = request.path.clone();
        let request = http::build_request(request, &path, Some(&self.authority))?;
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

impl Drop for TextChannel {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
