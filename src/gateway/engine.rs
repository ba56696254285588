//! Gateway engine: the end-to-end request lifecycle
//!
//! ```text
//! Received → RateChecked → BreakerChecked → Routed → Dispatched
//!          ↘ NotFound     ↘ Rejected       ↘ Fallback  ↘ Succeeded | BackendFailure
//! ```
//!
//! The route is looked up first because every policy is per route, but no
//! route resource is consumed before the rate limiter admits the request. A
//! rate-limited caller therefore never touches breaker or retry state.
//! `Routed` and `Dispatched` are only recorded once an endpoint was selected.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::traits::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};
use crate::config::GatewayConfig;
use crate::error::{ErrorResponse, GatewayError, Result};
use crate::gateway::filters::{FilterChain, RequestContext};
use crate::gateway::load_balancer::{EndpointResolver, LoadBalancer};
use crate::gateway::route::{Fallback, RouteDefinition, RouteTable};
use crate::gateway::router::{match_route, Router};
use crate::resilience::circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerRegistry, CircuitMetrics, Permit,
};
use crate::resilience::rate_limit::RateLimiterRegistry;
use crate::resilience::retry::{self, AttemptOutcome};

/// Lifecycle stages a request passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    RateChecked,
    BreakerChecked,
    Routed,
    Dispatched,
}

/// Final outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// A backend (or a local fallback endpoint) produced the response
    Succeeded,
    /// The breaker short-circuited the call
    Fallback,
    /// The rate limiter refused the request
    Rejected,
    /// No route matched
    NotFound,
    /// Retries exhausted on timeouts, transport errors or 5xx
    BackendFailure,
}

/// Inbound request as seen by the engine
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_addr: Option<SocketAddr>,
}

impl GatewayRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_addr: None,
        }
    }

    /// Add a header; invalid names or values are ignored
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn path(&self) -> &str {
        self.path_and_query
            .split_once('?')
            .map_or(self.path_and_query.as_str(), |(path, _)| path)
    }
}

/// Response produced by the engine
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub outcome: Outcome,
    pub trail: Vec<Stage>,
    /// Backend attempts made
    pub attempts: u32,
    pub route_id: Option<String>,
}

impl GatewayResponse {
    pub fn new(status: StatusCode, outcome: Outcome) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            outcome,
            trail: Vec::new(),
            attempts: 0,
            route_id: None,
        }
    }

    fn from_upstream(response: UpstreamResponse, outcome: Outcome) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            ..Self::new(response.status, outcome)
        }
    }

    fn from_error(error: &GatewayError, outcome: Outcome) -> Self {
        let mut response = Self::new(error.status(), outcome);
        // Serializing plain strings cannot fail
        response.body = serde_json::to_vec(&ErrorResponse::from_error(error))
            .map(Bytes::from)
            .unwrap_or_default();
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    fn from_fallback(fallback: &Fallback, outcome: Outcome) -> Self {
        let mut response = Self::new(fallback.status, outcome);
        response.body = Bytes::from(fallback.message.clone());
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// What a single dispatch attempt produced
enum AttemptResult {
    Response(UpstreamResponse),
    Failed(GatewayError),
    /// The breaker refused a retry attempt
    ShortCircuited,
}

/// Composes routing, rate limiting, circuit breaking, load balancing and retries
pub struct Gateway {
    router: Router,
    load_balancer: Arc<LoadBalancer>,
    upstream: Arc<dyn Upstream>,
    breakers: CircuitBreakerRegistry,
    limiters: Arc<RateLimiterRegistry>,
    filters: FilterChain,
}

impl Gateway {
    pub fn new(
        table: RouteTable,
        load_balancer: Arc<LoadBalancer>,
        upstream: Arc<dyn Upstream>,
        filters: FilterChain,
    ) -> Self {
        Self {
            router: Router::new(table),
            load_balancer,
            upstream,
            breakers: CircuitBreakerRegistry::new(),
            limiters: Arc::new(RateLimiterRegistry::new()),
            filters,
        }
    }

    /// Build a gateway from validated configuration
    pub fn from_config(
        config: &GatewayConfig,
        resolver: Arc<dyn EndpointResolver>,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self> {
        let table = RouteTable::from_config(config)?;
        let correlation_header = HeaderName::from_bytes(config.correlation_header.as_bytes())
            .map_err(|e| {
                GatewayError::config(format!(
                    "correlation_header '{}': {}",
                    config.correlation_header, e
                ))
            })?;
        let load_balancer = Arc::new(LoadBalancer::with_strategy(resolver, config.load_balancing));

        info!(routes = table.len(), "Gateway initialized");
        Ok(Self::new(
            table,
            load_balancer,
            upstream,
            FilterChain::standard(correlation_header),
        ))
    }

    /// Atomically replace the route table.
    ///
    /// Breaker and limiter state survives only for routes that still exist
    /// with identical policy configuration.
    pub fn reload(&self, table: RouteTable) {
        self.router.replace(table);
        let current = self.router.snapshot();

        self.breakers.retain(|id, config| {
            current
                .get(id)
                .and_then(|r| r.circuit_breaker.as_ref())
                .is_some_and(|c| c == config)
        });
        self.limiters.retain(|id, config| {
            current
                .get(id)
                .and_then(|r| r.rate_limiter.as_ref())
                .is_some_and(|c| c == config)
        });
    }

    /// Current route table snapshot
    pub fn routes(&self) -> Arc<RouteTable> {
        self.router.snapshot()
    }

    /// Breaker metrics of a route, if its breaker has been created
    pub fn breaker_metrics(&self, route_id: &str) -> Option<CircuitMetrics> {
        self.breakers.get(route_id).map(|b| b.metrics())
    }

    pub fn rate_limiters(&self) -> &Arc<RateLimiterRegistry> {
        &self.limiters
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.load_balancer
    }

    /// Run one request through the full pipeline
    pub async fn handle(&self, mut request: GatewayRequest) -> GatewayResponse {
        let mut context = RequestContext::default();
        let mut trail = vec![Stage::Received];

        self.filters.apply_pre(&mut request, &mut context);

        let method = request.method.clone();
        let path = request.path_and_query.clone();
        let table = self.router.snapshot();
        let mut response = self.process(&table, request, &mut context, &mut trail).await;
        response.trail = trail;

        self.filters.apply_post(&context, &mut response);

        info!(
            method = %method,
            path = %path,
            route = response.route_id.as_deref().unwrap_or("-"),
            status = response.status.as_u16(),
            outcome = ?response.outcome,
            attempts = response.attempts,
            correlation_id = context.correlation_id.as_deref().unwrap_or("-"),
            "Request completed"
        );

        response
    }

    async fn process(
        &self,
        table: &RouteTable,
        request: GatewayRequest,
        context: &mut RequestContext,
        trail: &mut Vec<Stage>,
    ) -> GatewayResponse {
        // Fallback endpoints are always reachable
        if let Some(fallback) = table.fallback(request.path()) {
            return GatewayResponse::from_fallback(fallback, Outcome::Succeeded);
        }

        let Some(matched) = match_route(table, &request.path_and_query) else {
            debug!(path = %request.path_and_query, "No route matched");
            return GatewayResponse::from_error(
                &GatewayError::NoRouteMatch(request.path().to_string()),
                Outcome::NotFound,
            );
        };
        let route = matched.route.clone();
        context.route = Some(route.clone());

        let mut response = self
            .dispatch(&route, matched.rewritten_path, request, trail)
            .await;
        response.route_id = Some(route.id.clone());
        response
    }

    async fn dispatch(
        &self,
        route: &Arc<RouteDefinition>,
        rewritten_path: String,
        request: GatewayRequest,
        trail: &mut Vec<Stage>,
    ) -> GatewayResponse {
        if let Some(config) = &route.rate_limiter {
            let key = config.key.resolve(&request.headers, request.client_addr);
            match self.limiters.try_acquire(&route.id, &key, config) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(route = %route.id, key = %key, "Rate limit exceeded");
                    return GatewayResponse::from_error(
                        &GatewayError::RateLimited(route.id.clone()),
                        Outcome::Rejected,
                    );
                }
                Err(e) => return GatewayResponse::from_error(&e, Outcome::Rejected),
            }
        }
        trail.push(Stage::RateChecked);

        let breaker = route
            .circuit_breaker
            .as_ref()
            .map(|config| self.breakers.get_or_create(&route.id, config));
        let mut first_permit = match &breaker {
            Some(breaker) => match breaker.try_acquire() {
                Some(permit) => Some(permit),
                None => return Self::short_circuit(route),
            },
            None => None,
        };
        trail.push(Stage::BreakerChecked);

        let upstream_request = UpstreamRequest {
            method: request.method.clone(),
            path_and_query: rewritten_path,
            headers: request.headers,
            body: request.body,
        };
        let routed = AtomicBool::new(false);

        let executed = retry::execute(route.retry.as_ref(), &request.method, |attempt| {
            let permit = if attempt == 1 {
                first_permit.take().map(Some)
            } else {
                breaker.as_ref().map(CircuitBreaker::try_acquire)
            };
            let upstream_request = &upstream_request;
            let routed = &routed;
            async move {
                let permit = match permit {
                    Some(Some(permit)) => Some(permit),
                    Some(None) => return AttemptOutcome::Abort(AttemptResult::ShortCircuited),
                    None => None,
                };
                self.attempt(route, upstream_request, attempt, permit, routed)
                    .await
            }
        })
        .await;

        if routed.load(Ordering::Relaxed) {
            trail.push(Stage::Routed);
            trail.push(Stage::Dispatched);
        }

        let mut response = match executed.value {
            AttemptResult::Response(upstream) => {
                let outcome = if upstream.status.is_server_error() {
                    Outcome::BackendFailure
                } else {
                    Outcome::Succeeded
                };
                GatewayResponse::from_upstream(upstream, outcome)
            }
            AttemptResult::Failed(error) => {
                GatewayResponse::from_error(&error, Outcome::BackendFailure)
            }
            AttemptResult::ShortCircuited => Self::short_circuit(route),
        };
        response.attempts = executed.attempts;
        response
    }

    async fn attempt(
        &self,
        route: &RouteDefinition,
        request: &UpstreamRequest,
        attempt: u32,
        permit: Option<Permit>,
        routed: &AtomicBool,
    ) -> AttemptOutcome<AttemptResult> {
        let result = match self.load_balancer.select_endpoint(&route.target).await {
            Ok(endpoint) => {
                routed.store(true, Ordering::Relaxed);
                match tokio::time::timeout(route.timeout, self.upstream.send(&endpoint, request))
                    .await
                {
                    Ok(Ok(response)) => AttemptResult::Response(response),
                    Ok(Err(UpstreamError::Timeout(url))) => {
                        AttemptResult::Failed(GatewayError::Timeout(url))
                    }
                    Ok(Err(error)) => {
                        AttemptResult::Failed(GatewayError::BackendError(error.to_string()))
                    }
                    Err(_) => AttemptResult::Failed(GatewayError::Timeout(format!(
                        "{}{} exceeded {}ms",
                        endpoint.url,
                        request.path_and_query,
                        route.timeout.as_millis()
                    ))),
                }
            }
            Err(error) => AttemptResult::Failed(error),
        };

        let transient = match &result {
            AttemptResult::Response(response) => response.status.is_server_error(),
            AttemptResult::Failed(_) => true,
            AttemptResult::ShortCircuited => false,
        };

        if let Some(permit) = permit {
            permit.record(if transient {
                CallOutcome::Failure
            } else {
                CallOutcome::Success
            });
        }

        if transient {
            match &result {
                AttemptResult::Response(response) => warn!(
                    route = %route.id,
                    attempt,
                    status = response.status.as_u16(),
                    "Backend returned server error"
                ),
                AttemptResult::Failed(error) => warn!(
                    route = %route.id,
                    attempt,
                    error = %error,
                    "Backend attempt failed"
                ),
                AttemptResult::ShortCircuited => {}
            }
            AttemptOutcome::Transient(result)
        } else {
            AttemptOutcome::Complete(result)
        }
    }

    fn short_circuit(route: &RouteDefinition) -> GatewayResponse {
        warn!(route = %route.id, "Circuit open, serving fallback");
        match &route.fallback {
            Some(fallback) => GatewayResponse::from_fallback(fallback, Outcome::Fallback),
            None => GatewayResponse::from_error(
                &GatewayError::CircuitOpen(route.id.clone()),
                Outcome::Fallback,
            ),
        }
    }
}
