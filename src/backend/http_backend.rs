//! HTTP upstream client implementation

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{
    is_hop_by_hop, Endpoint, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse,
    HOP_BY_HOP_HEADERS,
};
use crate::error::{GatewayError, Result};

/// Forwards requests to backends over HTTP using a pooled client
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    /// Create a new HTTP upstream; per-attempt deadlines are enforced by the caller
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn target_url(endpoint: &Endpoint, path_and_query: &str) -> String {
        format!("{}{}", endpoint.url.trim_end_matches('/'), path_and_query)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &UpstreamRequest,
    ) -> std::result::Result<UpstreamResponse, UpstreamError> {
        let url = Self::target_url(endpoint, &request.path_and_query);

        // reqwest and axum depend on different `http` major versions
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| UpstreamError::Request(url.clone(), e.to_string()))?;

        let mut builder = self.client.request(method, &url);
        for (name, value) in request.headers.iter() {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_bytes());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        debug!(url = %url, method = %request.method, "Forwarding request");

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(url.clone())
            } else if e.is_connect() {
                UpstreamError::Connect(url.clone(), e.to_string())
            } else {
                UpstreamError::Request(url.clone(), e.to_string())
            }
        })?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| UpstreamError::Request(url.clone(), e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in response.headers().iter() {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(url = %url, header = %name, "Dropping unrepresentable response header"),
            }
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(url.clone())
            } else {
                UpstreamError::Request(url.clone(), e.to_string())
            }
        })?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
