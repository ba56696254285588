//! Router construction

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::AppState;

/// Build the application router.
///
/// Admin endpoints are matched first; every other path goes through the gateway.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/gateway/routes", get(handlers::list_routes))
        .route("/gateway/refresh", post(handlers::refresh_routes))
        .fallback(handlers::proxy)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
