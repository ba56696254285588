//! Ordered request/response filter chain
//!
//! Pre-filters run in registration order before the request is routed,
//! post-filters run in reverse order once the final response exists.
//! Post-filters must be idempotent: they may observe a response that already
//! carries their headers (a backend echoing the correlation id, or the chain
//! being applied again).

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::gateway::engine::{GatewayRequest, GatewayResponse};
use crate::gateway::route::RouteDefinition;

pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// Per-request state shared between filters
#[derive(Debug, Default, Clone)]
pub struct RequestContext {
    pub correlation_id: Option<String>,
    /// Matched route, once known
    pub route: Option<Arc<RouteDefinition>>,
}

/// A cross-cutting request/response transformer
pub trait GatewayFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn pre(&self, _request: &mut GatewayRequest, _context: &mut RequestContext) {}

    fn post(&self, _context: &RequestContext, _response: &mut GatewayResponse) {}
}

/// Ensures every request has a correlation id and echoes it once on the response
pub struct CorrelationFilter {
    header: HeaderName,
}

impl CorrelationFilter {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    /// Correlation id carried by `headers`, if any
    pub fn correlation_id(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

impl GatewayFilter for CorrelationFilter {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn pre(&self, request: &mut GatewayRequest, context: &mut RequestContext) {
        let id = match self.correlation_id(&request.headers) {
            Some(id) => {
                debug!(correlation_id = %id, "Correlation id found in inbound request");
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                // A UUID is always a valid header value
                if let Ok(value) = HeaderValue::from_str(&id) {
                    request.headers.insert(self.header.clone(), value);
                }
                debug!(correlation_id = %id, "Generated correlation id");
                id
            }
        };
        context.correlation_id = Some(id);
    }

    fn post(&self, context: &RequestContext, response: &mut GatewayResponse) {
        if response.headers.contains_key(&self.header) {
            return;
        }
        let Some(id) = context.correlation_id.as_deref() else {
            return;
        };
        match HeaderValue::from_str(id) {
            Ok(value) => {
                debug!(correlation_id = %id, "Updated the correlation id to the outbound headers");
                response.headers.insert(self.header.clone(), value);
            }
            Err(_) => warn!(correlation_id = %id, "Correlation id is not a valid header value"),
        }
    }
}

/// Stamps `X-Response-Time` and the matched route's static response headers
pub struct ResponseHeadersFilter;

impl GatewayFilter for ResponseHeadersFilter {
    fn name(&self) -> &'static str {
        "response-headers"
    }

    fn post(&self, context: &RequestContext, response: &mut GatewayResponse) {
        let now = chrono::Utc::now().to_rfc3339();
        if let Ok(value) = HeaderValue::from_str(&now) {
            response
                .headers
                .insert(HeaderName::from_static(RESPONSE_TIME_HEADER), value);
        }

        if let Some(route) = &context.route {
            for (name, value) in &route.response_headers {
                if !response.headers.contains_key(name) {
                    response.headers.insert(name.clone(), value.clone());
                }
            }
        }
    }
}

/// Ordered list of filters
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn GatewayFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlation first, so its post-filter runs last
    pub fn standard(correlation_header: HeaderName) -> Self {
        Self::new()
            .with(CorrelationFilter::new(correlation_header))
            .with(ResponseHeadersFilter)
    }

    pub fn with<F: GatewayFilter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn apply_pre(&self, request: &mut GatewayRequest, context: &mut RequestContext) {
        for filter in &self.filters {
            filter.pre(request, context);
        }
    }

    pub fn apply_post(&self, context: &RequestContext, response: &mut GatewayResponse) {
        for filter in self.filters.iter().rev() {
            filter.post(context, response);
        }
    }
}
