//! Conversions shared by the HTTP/1.1 and HTTP/2 transports.

use std::collections::BTreeMap;

use axum::body::Body;
use hyper::body::Incoming;

use crate::error::TransportError;
use crate::execution::{Response, WireRequest};

/// Build a hyper request. `uri` is origin-form for HTTP/1.1 and absolute
/// for HTTP/2; `host` is only sent for HTTP/1.1.
pub(crate) fn build_request(
    request: WireRequest,
    uri: &str,
    host: Option<&str>,
) -> Result<hyper::Request<Body>, TransportError> {
    let mut builder = hyper::Request::builder()
        .method(hyper::Method::from(request.method))
        .uri(uri);
    if let Some(host) = host {
        builder = builder.header(hyper::header::HOST, host);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .header(hyper::header::CONTENT_LENGTH, request.body.len())
        .body(Body::from(request.body))
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

/// Read a complete hyper response into a [`Response`].
pub(crate) async fn read_response(
    response: hyper::Response<Incoming>,
) -> Result<Response, TransportError> {
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(Body::new(body), usize::MAX)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;

    let mut headers = BTreeMap::new();
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    Ok(Response {
        status: parts.status.as_u16(),
        headers,
        body,
    })
}
