//! Configuration loading and validation

pub mod settings;

pub use settings::{
    BackendConfig, CircuitBreakerSettings, EndpointConfig, FallbackConfig, GatewayConfig,
    LoggingConfig, RateLimiterSettings, RetrySettings, RouteConfig, ServerConfig, Settings,
};
