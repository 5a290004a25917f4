//! Body compression applied uniformly across transport variants.
//!
//! Requests above the threshold are compressed and declared with
//! `content-encoding`. Responses are decompressed only when their
//! `content-encoding` header names a supported algorithm.

use bytes::Bytes;

use crate::config::{CompressionAlgorithm, CompressionConfig};
use crate::error::{ClientError, TransportError};
use crate::execution::{Response, WireRequest};

pub const CONTENT_ENCODING: &str = "content-encoding";
pub const ACCEPT_ENCODING: &str = "accept-encoding";

#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Value advertised in `accept-encoding`, if any.
    pub fn accept_encoding(&self) -> Option<&'static str> {
        self.config
            .enabled
            .then(|| self.config.algorithm.encoding())
    }

    /// Compress the request body in place when it exceeds the threshold.
    /// Returns whether the body was replaced.
    pub fn compress_request(&self, request: &mut WireRequest) -> Result<bool, TransportError> {
        if !self.config.enabled || request.body.len() <= self.config.threshold_bytes {
            return Ok(false);
        }
        let compressed = match self.config.algorithm {
            CompressionAlgorithm::Zstd => zstd::bulk::compress(&request.body, self.config.level)
                .map_err(|e| TransportError::Protocol(format!("zstd compress: {e}")))?,
        };
        tracing::trace!(
            original = request.body.len(),
            compressed = compressed.len(),
            "Compressed request body"
        );
        request.body = Bytes::from(compressed);
        request.headers.push((
            CONTENT_ENCODING.to_string(),
            self.config.algorithm.encoding().to_string(),
        ));
        Ok(true)
    }
}

/// Decompress a response body according to its declared encoding.
///
/// Bodies without a `content-encoding` header, or with `identity`, pass
/// through untouched. A body that cannot be decoded is a serialization
/// error: the exchange itself completed, so it never counts against the host.
pub fn decompress_response(response: &mut Response) -> Result<(), ClientError> {
    let Some(encoding) = response.header(CONTENT_ENCODING) else {
        return Ok(());
    };
    match encoding.trim().to_ascii_lowercase().as_str() {
        "identity" | "" => Ok(()),
        "zstd" => {
            let decoded = zstd::stream::decode_all(response.body.as_ref())
                .map_err(|e| ClientError::Serialization(format!("zstd decompress: {e}")))?;
            response.body = Bytes::from(decoded);
            response.headers.remove(CONTENT_ENCODING);
            Ok(())
        }
        other => Err(ClientError::Serialization(format!(
            "unsupported content-encoding '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Method;
    use std::collections::BTreeMap;

    fn enabled(threshold: usize) -> Compressor {
        Compressor::new(CompressionConfig {
            enabled: true,
            threshold_bytes: threshold,
            ..CompressionConfig::default()
        })
    }

    fn wire(body: &[u8]) -> WireRequest {
        WireRequest {
            method: Method::Post,
            path: "/_api/document/c".to_string(),
            headers: Vec::new(),
            body: Bytes::copy_from_slice(body),
        }
    }

    #[test]
    fn test_small_body_untouched() {
        let mut request = wire(b"{}");
        assert!(!enabled(1024).compress_request(&mut request).unwrap());
        assert_eq!(request.body.as_ref(), b"{}");
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_disabled_never_compresses() {
        let compressor = Compressor::new(CompressionConfig::default());
        let mut request = wire(&[b'a'; 4096]);
        assert!(!compressor.compress_request(&mut request).unwrap());
        assert!(compressor.accept_encoding().is_none());
    }

    #[test]
    fn test_large_body_declared_and_decodable() {
        let original = vec![b'x'; 8192];
        let mut request = wire(&original);
        assert!(enabled(1024).compress_request(&mut request).unwrap());
        assert!(request.body.len() < original.len());
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == CONTENT_ENCODING && v == "zstd"));

        let mut headers = BTreeMap::new();
        headers.insert(CONTENT_ENCODING.to_string(), "zstd".to_string());
        let mut response = Response {
            status: 200,
            headers,
            body: request.body.clone(),
        };
        decompress_response(&mut response).unwrap();
        assert_eq!(response.body.as_ref(), original.as_slice());
        assert!(response.header(CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_undeclared_body_never_sniffed() {
        let compressed = zstd::bulk::compress(b"hello", 3).unwrap();
        let mut response = Response {
            status: 200,
            headers: BTreeMap::new(),
            body: Bytes::from(compressed.clone()),
        };
        decompress_response(&mut response).unwrap();
        assert_eq!(response.body.as_ref(), compressed.as_slice());
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let mut headers = BTreeMap::new();
        headers.insert(CONTENT_ENCODING.to_string(), "br".to_string());
        let mut response = Response {
            status: 200,
            headers,
            body: Bytes::from_static(b"..."),
        };
        assert!(matches!(
            decompress_response(&mut response),
            Err(ClientError::Serialization(_))
        ));
    }
}
