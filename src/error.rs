//! Common error types for the gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Gateway-wide error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No route matches path: {0}")]
    NoRouteMatch(String),

    #[error("Rate limit exceeded for route: {0}")]
    RateLimited(String),

    #[error("Circuit breaker is open for route: {0}")]
    CircuitOpen(String),

    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    #[error("No endpoints available for backend: {0}")]
    NoEndpoints(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Shorthand for a configuration error with a formatted message
    pub fn config(message: impl Into<String>) -> Self {
        GatewayError::Configuration(message.into())
    }

    /// HTTP status the caller sees for this error
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Config(_)
            | GatewayError::Configuration(_)
            | GatewayError::Io(_)
            | GatewayError::Json(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::HttpClient(_) | GatewayError::BackendError(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoRouteMatch(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen(_)
            | GatewayError::BackendNotFound(_)
            | GatewayError::NoEndpoints(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn kind(&self) -> (&'static str, Option<&'static str>) {
        match self {
            GatewayError::Config(_) | GatewayError::Configuration(_) => {
                ("server_error", Some("invalid_configuration"))
            }
            GatewayError::Io(_) | GatewayError::Json(_) | GatewayError::Internal(_) => {
                ("server_error", None)
            }
            GatewayError::HttpClient(_) | GatewayError::BackendError(_) => ("backend_error", None),
            GatewayError::InvalidRequest(_) => ("invalid_request_error", None),
            GatewayError::NoRouteMatch(_) => ("not_found_error", Some("no_route_match")),
            GatewayError::RateLimited(_) => ("rate_limit_error", Some("rate_limit_exceeded")),
            GatewayError::CircuitOpen(_) => ("backend_error", Some("circuit_open")),
            GatewayError::BackendNotFound(_) => ("backend_error", Some("backend_not_found")),
            GatewayError::NoEndpoints(_) => ("backend_error", Some("no_endpoints")),
            GatewayError::Timeout(_) => ("timeout_error", None),
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn from_error(error: &GatewayError) -> Self {
        let (error_type, code) = error.kind();
        Self {
            error: ErrorDetail {
                message: error.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse::from_error(&self))).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GatewayError>;
