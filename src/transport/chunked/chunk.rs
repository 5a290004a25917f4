//! Chunk framing and reassembly.
//!
//! ```text
//! +------------+-------------+--------------+----------------+---------+
//! | message_id | chunk_index | total_chunks | payload_length | payload |
//! |   u64 BE   |   u32 BE    |    u32 BE    |     u32 BE     |  bytes  |
//! +------------+-------------+--------------+----------------+---------+
//! ```

use std::collections::{BTreeMap, HashMap};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed chunk header.
pub const HEADER_LEN: usize = 20;

/// Upper bound on a single chunk payload accepted from the wire.
pub const MAX_CHUNK_PAYLOAD: u32 = 16 * 1024 * 1024;

/// Default upper bound on a reassembled message.
pub const DEFAULT_MAX_MESSAGE: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("message {message_id}: total_chunks is zero")]
    ZeroTotal { message_id: u64 },

    #[error("message {message_id}: chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange {
        message_id: u64,
        index: u32,
        total: u32,
    },

    #[error("message {message_id}: total_chunks changed from {expected} to {actual}")]
    TotalMismatch {
        message_id: u64,
        expected: u32,
        actual: u32,
    },

    #[error("message {message_id}: duplicate chunk {index}")]
    Duplicate { message_id: u64, index: u32 },

    #[error("chunk payload of {0} bytes exceeds limit")]
    Oversized(u32),

    #[error("message {message_id}: exceeds the {limit} byte message limit")]
    MessageTooLarge { message_id: u64, limit: usize },
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub message_id: u64,
    pub index: u32,
    pub total: u32,
    pub payload: Bytes,
}

impl Chunk {
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u64(self.message_id);
        dst.put_u32(self.index);
        dst.put_u32(self.total);
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
    }

    /// Decode one chunk from the front of `src`. Returns `Ok(None)` until a
    /// complete frame is buffered.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Chunk>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let payload_len = u32::from_be_bytes([src[16], src[17], src[18], src[19]]);
        if payload_len > MAX_CHUNK_PAYLOAD {
            return Err(FrameError::Oversized(payload_len));
        }
        if src.len() < HEADER_LEN + payload_len as usize {
            src.reserve(HEADER_LEN + payload_len as usize - src.len());
            return Ok(None);
        }
        let message_id = src.get_u64();
        let index = src.get_u32();
        let total = src.get_u32();
        let _ = src.get_u32();
        let payload = src.split_to(payload_len as usize).freeze();
        Ok(Some(Chunk {
            message_id,
            index,
            total,
            payload,
        }))
    }
}

/// Split a message into chunks of at most `chunk_size` payload bytes.
/// An empty message still produces a single empty chunk.
pub fn split(message_id: u64, mut message: Bytes, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let total = message.len().div_ceil(chunk_size).max(1) as u32;
    let mut chunks = Vec::with_capacity(total as usize);
    for index in 0..total {
        let take = chunk_size.min(message.len());
        chunks.push(Chunk {
            message_id,
            index,
            total,
            payload: message.split_to(take),
        });
    }
    chunks
}

#[derive(Debug)]
struct Partial {
    total: u32,
    buffered: usize,
    parts: BTreeMap<u32, Bytes>,
}

/// Buffers chunks per message id until every chunk of a message arrived.
///
/// Memory grows with the chunks actually received, never with the
/// `total_chunks` a peer announces.
#[derive(Debug)]
pub struct ChunkAssembler {
    partial: HashMap<u64, Partial>,
    max_message: usize,
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_MESSAGE)
    }
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject messages whose reassembled size would exceed `max_message` bytes.
    pub fn with_limit(max_message: usize) -> Self {
        Self {
            partial: HashMap::new(),
            max_message,
        }
    }

    /// Accept a chunk. Returns the reassembled message once complete.
    pub fn push(&mut self, chunk: Chunk) -> Result<Option<(u64, Bytes)>, FrameError> {
        let Chunk {
            message_id,
            index,
            total,
            payload,
        } = chunk;

        if total == 0 {
            return Err(FrameError::ZeroTotal { message_id });
        }
        if index >= total {
            return Err(FrameError::IndexOutOfRange {
                message_id,
                index,
                total,
            });
        }
        let too_large = FrameError::MessageTooLarge {
            message_id,
            limit: self.max_message,
        };
        if total == 1 && !self.partial.contains_key(&message_id) {
            if payload.len() > self.max_message {
                return Err(too_large);
            }
            return Ok(Some((message_id, payload)));
        }
        // Every chunk of a multi-chunk message carries at least one byte.
        if total as usize > self.max_message {
            return Err(too_large);
        }

        let partial = self.partial.entry(message_id).or_insert_with(|| Partial {
            total,
            buffered: 0,
            parts: BTreeMap::new(),
        });
        if partial.total != total {
            return Err(FrameError::TotalMismatch {
                message_id,
                expected: partial.total,
                actual: total,
            });
        }
        if partial.parts.contains_key(&index) {
            return Err(FrameError::Duplicate { message_id, index });
        }
        if partial.buffered + payload.len() > self.max_message {
            self.partial.remove(&message_id);
            return Err(too_large);
        }
        partial.buffered += payload.len();
        partial.parts.insert(index, payload);

        if partial.parts.len() < partial.total as usize {
            return Ok(None);
        }

        let Some(partial) = self.partial.remove(&message_id) else {
            return Ok(None);
        };
        let mut message = BytesMut::with_capacity(partial.buffered);
        for part in partial.parts.into_values() {
            message.extend_from_slice(&part);
        }
        Ok(Some((message_id, message.freeze())))
    }

    /// Number of messages with chunks still outstanding.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sizes() {
        let chunks = split(7, Bytes::from(vec![1u8; 25]), 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.payload.len()).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert!(chunks.iter().all(|c| c.total == 3 && c.message_id == 7));

        let empty = split(1, Bytes::new(), 10);
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].total, 1);
        assert!(empty[0].payload.is_empty());
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let chunk = Chunk {
            message_id: 42,
            index: 0,
            total: 1,
            payload: Bytes::from_static(b"hello"),
        };
        let mut encoded = BytesMut::new();
        chunk.encode(&mut encoded);

        let mut partial = BytesMut::from(&encoded[..HEADER_LEN + 2]);
        assert_eq!(Chunk::decode(&mut partial).unwrap(), None);
        partial.extend_from_slice(&encoded[HEADER_LEN + 2..]);
        assert_eq!(Chunk::decode(&mut partial).unwrap(), Some(chunk));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u64(1);
        buf.put_u32(0);
        buf.put_u32(1);
        buf.put_u32(MAX_CHUNK_PAYLOAD + 1);
        assert!(matches!(
            Chunk::decode(&mut buf),
            Err(FrameError::Oversized(_))
        ));
    }

    #[test]
    fn test_interleaved_messages_reassemble() {
        let first = Bytes::from_static(b"aaaaaaaaaabbbbbbbbbbcc");
        let second = Bytes::from_static(b"zzzzzzzzzzyy");
        let a = split(1, first.clone(), 10);
        let b = split(2, second.clone(), 10);
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 2);

        let mut assembler = ChunkAssembler::new();
        let order = [
            a[0].clone(),
            b[1].clone(),
            a[2].clone(),
            b[0].clone(),
            a[1].clone(),
        ];
        let mut done = Vec::new();
        for chunk in order {
            if let Some(message) = assembler.push(chunk).unwrap() {
                done.push(message);
            }
        }
        assert_eq!(done, vec![(2, second), (1, first)]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_malformed_chunks_rejected() {
        let mut assembler = ChunkAssembler::new();
        let chunk = |index, total| Chunk {
            message_id: 9,
            index,
            total,
            payload: Bytes::from_static(b"x"),
        };

        assert!(matches!(
            assembler.push(chunk(0, 0)),
            Err(FrameError::ZeroTotal { .. })
        ));
        assert!(matches!(
            assembler.push(chunk(3, 3)),
            Err(FrameError::IndexOutOfRange { .. })
        ));
        assert_eq!(assembler.push(chunk(0, 3)).unwrap(), None);
        assert!(matches!(
            assembler.push(chunk(0, 3)),
            Err(FrameError::Duplicate { .. })
        ));
        assert!(matches!(
            assembler.push(chunk(1, 4)),
            Err(FrameError::TotalMismatch { .. })
        ));
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn test_announced_total_does_not_allocate() {
        let mut assembler = ChunkAssembler::new();
        let hostile = Chunk {
            message_id: 3,
            index: 0,
            total: u32::MAX,
            payload: Bytes::from_static(b"x"),
        };
        assert!(matches!(
            assembler.push(hostile),
            Err(FrameError::MessageTooLarge { message_id: 3, .. })
        ));
        assert_eq!(assembler.pending(), 0);

        // Within the chunk-count bound, storage tracks what actually arrived.
        let mut assembler = ChunkAssembler::with_limit(1024);
        let sparse = Chunk {
            message_id: 4,
            index: 700,
            total: 1000,
            payload: Bytes::from_static(b"y"),
        };
        assert_eq!(assembler.push(sparse).unwrap(), None);
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn test_message_limit_enforced_on_buffered_bytes() {
        let mut assembler = ChunkAssembler::with_limit(25);
        let chunks = split(8, Bytes::from(vec![7u8; 30]), 10);
        assert_eq!(assembler.push(chunks[0].clone()).unwrap(), None);
        assert_eq!(assembler.push(chunks[1].clone()).unwrap(), None);
        assert!(matches!(
            assembler.push(chunks[2].clone()),
            Err(FrameError::MessageTooLarge { message_id: 8, limit: 25 })
        ));
        assert_eq!(assembler.pending(), 0);

        let single = split(9, Bytes::from(vec![1u8; 26]), 100);
        assert!(matches!(
            assembler.push(single[0].clone()),
            Err(FrameError::MessageTooLarge { .. })
        ));

        let fits = split(10, Bytes::from(vec![2u8; 25]), 10);
        let mut done = None;
        for chunk in fits {
            done = assembler.push(chunk).unwrap();
        }
        assert_eq!(done.map(|(_, m)| m.len()), Some(25));
    }
}
