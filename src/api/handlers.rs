//! Request handlers

use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{GatewayError, Result};
use crate::gateway::{GatewayRequest, RouteTable};
use crate::resilience::circuit_breaker::CircuitMetrics;
use crate::AppState;

/// Largest request body buffered for forwarding
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub routes: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        routes: state.gateway.routes().len(),
    })
}

/// Route as reported by the admin listing
#[derive(Debug, Serialize)]
pub struct RouteSummary {
    pub id: String,
    pub path: String,
    pub rewrite: String,
    pub uri: String,
    pub timeout_ms: u64,
    pub fallback: Option<String>,
    pub retry_attempts: Option<u32>,
    pub rate_limited: bool,
    /// Present once the route's breaker has seen traffic
    pub circuit_breaker: Option<CircuitMetrics>,
}

/// List the active routes in match order
pub async fn list_routes(State(state): State<Arc<AppState>>) -> Json<Vec<RouteSummary>> {
    let table = state.gateway.routes();
    let routes = table
        .routes()
        .iter()
        .map(|route| RouteSummary {
            id: route.id.clone(),
            path: route.predicate.pattern(),
            rewrite: route.rewrite.as_str().to_string(),
            uri: route.target.uri(),
            timeout_ms: route.timeout.as_millis() as u64,
            fallback: route.fallback.as_ref().map(|f| f.path.clone()),
            retry_attempts: route.retry.as_ref().map(|r| r.max_attempts),
            rate_limited: route.rate_limiter.is_some(),
            circuit_breaker: state.gateway.breaker_metrics(&route.id),
        })
        .collect();
    Json(routes)
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub routes: usize,
}

/// Re-read the configuration file and swap in its routes and fallbacks.
///
/// An invalid file leaves the current table untouched. Backends, load
/// balancing, the correlation header and the sweep interval are bound at
/// startup, so a file changing them is refused.
pub async fn refresh_routes(State(state): State<Arc<AppState>>) -> Result<Json<RefreshResponse>> {
    let settings = Settings::load_from_path(&state.config_path).map_err(|e| {
        warn!(error = %e, "Route refresh rejected");
        e
    })?;
    settings.validate()?;

    let mut current = state.settings.write().await;
    let changed = current.gateway.startup_only_changes(&settings.gateway);
    if !changed.is_empty() {
        warn!(sections = ?changed, "Route refresh rejected");
        return Err(GatewayError::config(format!(
            "{} changed; restart the gateway to apply",
            changed.join(", ")
        )));
    }

    let table = RouteTable::from_config(&settings.gateway)?;
    let routes = table.len();
    state.gateway.reload(table);
    current.gateway.routes = settings.gateway.routes;
    current.gateway.fallbacks = settings.gateway.fallbacks;

    info!(routes, "Route table refreshed");
    Ok(Json(RefreshResponse { routes }))
}

/// Catch-all handler forwarding through the gateway engine
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return GatewayError::InvalidRequest(e.to_string()).into_response(),
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let mut request = GatewayRequest::new(parts.method, path_and_query).with_body(body);
    request.headers = parts.headers;
    if let Some(ConnectInfo(addr)) = connect_info {
        request = request.with_client_addr(addr);
    }

    state.gateway.handle(request).await.into_response()
}
