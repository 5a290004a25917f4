//! Message envelope carried inside a chunk sequence.
//!
//! `u32 header length (BE) | JSON header | body`. Request headers carry
//! `{method, path, headers}`, response headers `{status, headers}`.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::execution::{Method, Response, WireRequest};

#[derive(Debug, Serialize, Deserialize)]
struct RequestHeader {
    method: Method,
    path: String,
    #[serde(default)]
    headers: Vec<(String, String)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseHeader {
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

fn encode<H: Serialize>(header: &H, body: &[u8]) -> Result<Bytes, TransportError> {
    let header = serde_json::to_vec(header)
        .map_err(|e| TransportError::Protocol(format!("envelope header: {e}")))?;
    let mut buf = BytesMut::with_capacity(4 + header.len() + body.len());
    buf.put_u32(header.len() as u32);
    buf.put_slice(&header);
    buf.put_slice(body);
    Ok(buf.freeze())
}

fn decode<H: for<'de> Deserialize<'de>>(mut message: Bytes) -> Result<(H, Bytes), TransportError> {
    if message.len() < 4 {
        return Err(TransportError::Protocol("envelope shorter than its length prefix".into()));
    }
    let header_len = message.get_u32() as usize;
    if message.len() < header_len {
        return Err(TransportError::Protocol(format!(
            "envelope header of {header_len} bytes truncated to {}",
            message.len()
        )));
    }
    let header = message.split_to(header_len);
    let header = serde_json::from_slice(&header)
        .map_err(|e| TransportError::Protocol(format!("envelope header: {e}")))?;
    Ok((header, message))
}

pub fn encode_request(request: &WireRequest) -> Result<Bytes, TransportError> {
    let header = RequestHeader {
        method: request.method,
        path: request.path.clone(),
        headers: request.headers.clone(),
    };
    encode(&header, &request.body)
}

pub fn decode_request(message: Bytes) -> Result<WireRequest, TransportError> {
    let (header, body): (RequestHeader, _) = decode(message)?;
    Ok(WireRequest {
        method: header.method,
        path: header.path,
        headers: header.headers,
        body,
    })
}

pub fn encode_response(response: &Response) -> Result<Bytes, TransportError> {
    let header = ResponseHeader {
        status: response.status,
        headers: response.headers.clone(),
    };
    encode(&header, &response.body)
}

pub fn decode_response(message: Bytes) -> Result<Response, TransportError> {
    let (header, body): (ResponseHeader, _) = decode(message)?;
    let headers = header
        .headers
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();
    Ok(Response {
        status: header.status,
        headers,
        body,
    })
}
