//! Shared mock servers for integration tests.
//!
//! Each server binds to an ephemeral loopback port and records every request
//! it receives along with connection and concurrency counts.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use docwire::config::{ClientConfig, Protocol};
use docwire::execution::WireRequest;
use docwire::transport::chunked::{chunk, decode_request, encode_response, Chunk, ChunkAssembler};
use docwire::{Client, Response};

/// A request as the server saw it. Header names are lowercase.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// What the server answers.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: vec![("content-type".into(), "application/json".into())],
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Default)]
struct Stats {
    hits: AtomicUsize,
    connections: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    requests: Mutex<Vec<Recorded>>,
}

type Handler = Arc<dyn Fn(&Recorded) -> Reply + Send + Sync>;

struct State {
    stats: Stats,
    handler: Handler,
}

impl State {
    async fn handle(&self, recorded: Recorded) -> Reply {
        self.stats.hits.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);

        let reply = (self.handler)(&recorded);
        self.stats.requests.lock().unwrap().push(recorded);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        reply
    }

    async fn handle_http(
        self: Arc<Self>,
        request: hyper::Request<Incoming>,
    ) -> Result<hyper::Response<Body>, Infallible> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(Body::new(body), usize::MAX)
            .await
            .unwrap_or_default();
        let headers = parts
            .headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let recorded = Recorded {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            headers,
            body,
        };

        let reply = self.handle(recorded).await;
        let mut builder = hyper::Response::builder().status(reply.status);
        for (name, value) in &reply.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        Ok(builder.body(Body::from(reply.body)).unwrap())
    }
}

/// A running mock server.
#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<State>,
}

impl MockServer {
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn hits(&self) -> usize {
        self.state.stats.hits.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.stats.connections.load(Ordering::SeqCst)
    }

    /// Highest number of requests handled at the same time.
    pub fn max_active(&self) -> usize {
        self.state.stats.max_active.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.stats.requests.lock().unwrap().clone()
    }
}

#[derive(Clone, Copy)]
enum Wire {
    Http1,
    Http2,
    Chunked(usize),
}

async fn start<F>(wire: Wire, handler: F) -> MockServer
where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(State {
        stats: Stats::default(),
        handler: Arc::new(handler),
    });

    let accept_state = state.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            accept_state.stats.connections.fetch_add(1, Ordering::SeqCst);
            let state = accept_state.clone();
            tokio::spawn(async move {
                match wire {
                    Wire::Http1 => {
                        let service = service_fn(move |req| state.clone().handle_http(req));
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    }
                    Wire::Http2 => {
                        let service = service_fn(move |req| state.clone().handle_http(req));
                        let _ = http2::Builder::new(TokioExecutor::new())
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    }
                    Wire::Chunked(chunk_size) => serve_chunked(stream, state, chunk_size).await,
                }
            });
        }
    });

    MockServer { addr, state }
}

async fn serve_chunked(stream: tokio::net::TcpStream, state: Arc<State>, chunk_size: usize) {
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    let mut assembler = ChunkAssembler::new();
    let mut buf = BytesMut::new();

    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        while let Ok(Some(frame)) = Chunk::decode(&mut buf) {
            let Ok(Some((message_id, message))) = assembler.push(frame) else {
                continue;
            };
            let Ok(request) = decode_request(message) else {
                continue;
            };
            let state = state.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                let reply = state.handle(recorded_from_wire(request)).await;
                let response = Response {
                    status: reply.status,
                    headers: reply.headers.into_iter().collect(),
                    body: reply.body,
                };
                let encoded = encode_response(&response).unwrap();
                // One chunk per lock so concurrent replies interleave.
                for frame in chunk::split(message_id, encoded, chunk_size) {
                    let mut out = BytesMut::new();
                    frame.encode(&mut out);
                    if writer.lock().await.write_all(&out).await.is_err() {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            });
        }
    }
}

fn recorded_from_wire(request: WireRequest) -> Recorded {
    Recorded {
        method: request.method.to_string(),
        path: request.path,
        headers: request
            .headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect(),
        body: request.body,
    }
}

pub async fn http1_server<F>(handler: F) -> MockServer
where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    start(Wire::Http1, handler).await
}

pub async fn http2_server<F>(handler: F) -> MockServer
where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    start(Wire::Http2, handler).await
}

/// A chunked-protocol server that splits replies into `chunk_size` frames.
pub async fn chunked_server<F>(chunk_size: usize, handler: F) -> MockServer
where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    start(Wire::Chunked(chunk_size), handler).await
}

/// A loopback address with nothing listening on it.
pub fn unused_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Config with short timeouts and no background probing.
pub fn test_config(hosts: Vec<String>, protocol: Protocol) -> ClientConfig {
    let mut config = ClientConfig::with_hosts(hosts);
    config.protocol.kind = protocol;
    config.timeouts.connect_ms = 500;
    config.timeouts.request_ms = 5_000;
    config.pool.acquire_timeout_ms = 2_000;
    config.pool.keep_alive_interval_secs = None;
    config.pool.shutdown_grace_ms = 500;
    config
}

/// Build a client on the test's runtime.
pub fn client(config: ClientConfig) -> Client {
    Client::builder(config)
        .runtime(tokio::runtime::Handle::current())
        .build()
        .unwrap()
}
