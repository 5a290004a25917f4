//! Payload codec boundary.
//!
//! The core never interprets payloads itself. It hands bytes to a [`Codec`]
//! along with the [`SerdeContext`] of the call that produced them, so a codec
//! can correlate values with the stream transaction they belong to.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{ClientError, Result};

/// Correlation values scoped to one `execute` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerdeContext {
    transaction_id: Option<String>,
}

impl SerdeContext {
    pub fn new(transaction_id: Option<String>) -> Self {
        Self { transaction_id }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }
}

/// Serializes request payloads and deserializes response payloads.
pub trait Codec: Send + Sync + std::fmt::Debug {
    fn serialize(&self, value: &Value) -> Result<Bytes>;

    fn deserialize(&self, bytes: &[u8], context: &SerdeContext) -> Result<Value>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn serialize(&self, value: &Value) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize(&self, bytes: &[u8], _context: &SerdeContext) -> Result<Value> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(bytes).map_err(ClientError::from)
    }
}

/// Decode `bytes` through `codec` and then into `T`.
pub fn decode_as<T>(codec: &dyn Codec, bytes: &[u8], context: &SerdeContext) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let value = codec.deserialize(bytes, context)?;
    serde_json::from_value(value).map_err(ClientError::from)
}
