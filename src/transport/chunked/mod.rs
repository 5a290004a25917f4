//! Chunked binary transport.
//!
//! # Data Flow
//! ```text
//! send(request)
//!     → message.rs (envelope: length-prefixed JSON header + body)
//!     → chunk.rs split into frames tagged with a fresh message id
//!     → writer task (round-robin across queued messages)
//!     → socket
//!
//! socket
//!     → reader task → ChunkAssembler (per message id)
//!     → pending[message id] oneshot → send() resolves
//! ```
//!
//! A request whose caller went away is removed from `pending`; its late
//! response is reassembled and then dropped by id, which keeps the stream
//! frame-clean.

pub mod chunk;
pub mod message;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Protocol;
use crate::error::TransportError;
use crate::execution::{Response, WireRequest};
use crate::net::TcpConnector;
use crate::transport::{Channel, Transport};

pub use chunk::{Chunk, ChunkAssembler, FrameError};
pub use message::{decode_request, decode_response, encode_request, encode_response};

#[derive(Debug)]
pub struct ChunkedTransport {
    connector: TcpConnector,
    chunk_size: usize,
    max_message: usize,
}

impl ChunkedTransport {
    /// `max_message` bounds every reassembled response.
    pub fn new(connector: TcpConnector, chunk_size: usize, max_message: usize) -> Self {
        Self {
            connector,
            chunk_size,
            max_message,
        }
    }
}

#[async_trait]
impl Transport for ChunkedTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Chunked
    }

    async fn open(&self, address: &str) -> Result<Box<dyn Channel>, TransportError> {
        let stream = self.connector.connect(address).await?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared::default());
        let (outbound, queue) = mpsc::unbounded_channel();

        let writer = tokio::spawn(writer_loop(write_half, queue, shared.clone()));
        let reader = tokio::spawn(reader_loop(
            read_half,
            ChunkAssembler::with_limit(self.max_message),
            shared.clone(),
            address.to_string(),
        ));

        Ok(Box::new(ChunkedChannel {
            chunk_size: self.chunk_size,
            next_id: AtomicU64::new(1),
            outbound,
            shared,
            reader,
            writer,
        }))
    }

    fn recovers_from_timeout(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Bytes>>>,
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the channel closed and fail every waiting request.
    fn shut(&self) {
        self.closed.store(true, Ordering::Release);
        self.pending.lock().expect("pending mutex poisoned").clear();
    }

    fn deliver(&self, message_id: u64, message: Bytes) -> bool {
        let waiter = self
            .pending
            .lock()
            .expect("pending mutex poisoned")
            .remove(&message_id);
        match waiter {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

struct ChunkedChannel {
    chunk_size: usize,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<Vec<Chunk>>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Removes a pending entry when its request future is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    message_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared
            .pending
            .lock()
            .expect("pending mutex poisoned")
            .remove(&self.message_id);
    }
}

#[async_trait]
impl Channel for ChunkedChannel {
    async fn send(&self, request: WireRequest) -> Result<Response, TransportError> {
        if self.shared.is_closed() {
            return Err(TransportError::Closed);
        }
        let message = encode_request(&request)?;
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("pending mutex poisoned")
            .insert(message_id, tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            message_id,
        };

        self.outbound
            .send(chunk::split(message_id, message, self.chunk_size))
            .map_err(|_| TransportError::Closed)?;

        let reply = rx.await.map_err(|_| TransportError::Closed)?;
        decode_response(reply)
    }

    fn is_open(&self) -> bool {
        !self.shared.is_closed() && !self.reader.is_finished() && !self.writer.is_finished()
    }

    fn close(&self) {
        self.shared.shut();
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for ChunkedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Write queued messages, one chunk per message per round.
async fn writer_loop<W>(
    mut socket: W,
    mut queue: mpsc::UnboundedReceiver<Vec<Chunk>>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    let mut active: VecDeque<VecDeque<Chunk>> = VecDeque::new();
    let mut buf = BytesMut::new();

    loop {
        if active.is_empty() {
            match queue.recv().await {
                Some(chunks) => active.push_back(chunks.into()),
                None => break,
            }
        }
        while let Ok(chunks) = queue.try_recv() {
            active.push_back(chunks.into());
        }

        let Some(mut message) = active.pop_front() else {
            continue;
        };
        if let Some(chunk) = message.pop_front() {
            buf.clear();
            chunk.encode(&mut buf);
            if let Err(e) = socket.write_all(&buf).await {
                tracing::debug!(error = %e, "Chunk write failed");
                break;
            }
        }
        if !message.is_empty() {
            active.push_back(message);
        }
    }

    shared.shut();
    let _ = socket.shutdown().await;
}

/// Read frames, reassemble messages and hand them to their waiters.
async fn reader_loop<R>(mut socket: R, mut assembler: ChunkAssembler, shared: Arc<Shared>, host: String)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(chunk::HEADER_LEN * 64);

    'read: loop {
        match socket.read_buf(&mut buf).await {
            Ok(0) => {
                tracing::debug!(host = %host, "Chunked connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "Chunk read failed");
                break;
            }
        }

        loop {
            let chunk = match Chunk::decode(&mut buf) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "Malformed chunk, closing connection");
                    break 'read;
                }
            };
            match assembler.push(chunk) {
                Ok(Some((message_id, message))) => {
                    if !shared.deliver(message_id, message) {
                        tracing::trace!(host = %host, message_id, "Dropped late response");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "Invalid chunk sequence, closing connection");
                    break 'read;
                }
            }
        }
    }

    shared.shut();
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_frames<R: AsyncRead + Unpin>(mut socket: R, count: usize) -> Vec<Chunk> {
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        while frames.len() < count {
            socket.read_buf(&mut buf).await.unwrap();
            while let Some(chunk) = Chunk::decode(&mut buf).unwrap() {
                frames.push(chunk);
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_writer_interleaves_queued_messages() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(chunk::split(1, Bytes::from(vec![b'a'; 30]), 10)).unwrap();
        tx.send(chunk::split(2, Bytes::from(vec![b'b'; 20]), 10)).unwrap();

        let shared = Arc::new(Shared::default());
        tokio::spawn(writer_loop(client, rx, shared));

        let frames = read_frames(server, 5).await;
        let order: Vec<(u64, u32)> = frames.iter().map(|c| (c.message_id, c.index)).collect();
        assert_eq!(order, vec![(1, 0), (2, 0), (1, 1), (2, 1), (1, 2)]);
    }

    #[tokio::test]
    async fn test_reader_delivers_by_message_id_and_drops_unknown() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let shared = Arc::new(Shared::default());

        let (tx, rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(5, tx);
        tokio::spawn(reader_loop(client, ChunkAssembler::new(), shared.clone(), "test".into()));

        let mut out = BytesMut::new();
        for c in chunk::split(4, Bytes::from_static(b"orphan"), 4) {
            c.encode(&mut out);
        }
        for c in chunk::split(5, Bytes::from_static(b"wanted reply"), 4) {
            c.encode(&mut out);
        }
        server.write_all(&out).await.unwrap();

        assert_eq!(rx.await.unwrap().as_ref(), b"wanted reply");
        assert!(!shared.is_closed());
    }

    #[tokio::test]
    async fn test_reader_eof_fails_waiters() {
        let (client, server) = tokio::io::duplex(1024);
        let shared = Arc::new(Shared::default());
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(1, tx);
        tokio::spawn(reader_loop(client, ChunkAssembler::new(), shared.clone(), "test".into()));

        drop(server);
        assert!(rx.await.is_err());
        assert!(shared.is_closed());
    }

    #[tokio::test]
    async fn test_reader_closes_on_oversized_announcement() {
        let (client, mut server) = tokio::io::duplex(1024);
        let shared = Arc::new(Shared::default());
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(1, tx);
        let reader = tokio::spawn(reader_loop(
            client,
            ChunkAssembler::with_limit(4096),
            shared.clone(),
            "test".into(),
        ));

        let mut out = BytesMut::new();
        Chunk {
            message_id: 1,
            index: 0,
            total: u32::MAX,
            payload: Bytes::from_static(b"x"),
        }
        .encode(&mut out);
        server.write_all(&out).await.unwrap();

        assert!(rx.await.is_err());
        reader.await.unwrap();
        assert!(shared.is_closed());
    }
}
