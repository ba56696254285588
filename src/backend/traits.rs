//! Common traits and types for upstream backends

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use thiserror::Error;

/// Hop-by-hop headers that are never forwarded in either direction
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// One concrete network location of a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Base URL, e.g. `http://10.0.0.5:8080`
    pub url: String,
    pub weight: u32,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: 1,
        }
    }

    pub fn with_weight(url: impl Into<String>, weight: u32) -> Self {
        Self {
            url: url.into(),
            weight,
        }
    }
}

/// Request as forwarded to a backend
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Rewritten path including the query string
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Response received from a backend
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Transport-level failure talking to a backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("connection to {0} failed: {1}")]
    Connect(String, String),

    #[error("request to {0} failed: {1}")]
    Request(String, String),
}

/// Something that can carry a request to a backend endpoint
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send `request` to `endpoint`
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &UpstreamRequest,
    ) -> std::result::Result<UpstreamResponse, UpstreamError>;
}
