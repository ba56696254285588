//! Application settings and configuration management

use crate::error::{GatewayError, Result};
use crate::gateway::load_balancer::LoadBalancingStrategy;
use crate::gateway::route::RouteTable;
use crate::resilience::retry::BackoffMode;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8072
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Routing and resilience configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Header carrying the correlation id in both directions
    #[serde(default = "default_correlation_header")]
    pub correlation_header: String,
    /// How often idle rate-limit buckets are purged
    #[serde(default = "default_sweep_interval")]
    pub rate_limit_sweep_interval_ms: u64,
    #[serde(default)]
    pub load_balancing: LoadBalancingStrategy,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<FallbackConfig>,
    /// Routes in registration order; the first match wins
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            correlation_header: default_correlation_header(),
            rate_limit_sweep_interval_ms: default_sweep_interval(),
            load_balancing: LoadBalancingStrategy::default(),
            backends: vec![],
            fallbacks: default_fallbacks(),
            routes: vec![],
        }
    }
}

fn default_correlation_header() -> String {
    "eazybank-correlation-id".to_string()
}

fn default_sweep_interval() -> u64 {
    60_000
}

fn default_fallbacks() -> Vec<FallbackConfig> {
    vec![FallbackConfig {
        path: "/contactSupport".to_string(),
        status: default_fallback_status(),
        message: default_fallback_message(),
    }]
}

/// Logical backend with its statically known endpoints
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    pub name: String,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Local endpoint answering with a canned advisory message
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FallbackConfig {
    pub path: String,
    #[serde(default = "default_fallback_status")]
    pub status: u16,
    #[serde(default = "default_fallback_message")]
    pub message: String,
}

fn default_fallback_status() -> u16 {
    200
}

fn default_fallback_message() -> String {
    "An error occured. Please try after some time or contact support team!!!".to_string()
}

/// A single route as written in configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteConfig {
    pub id: String,
    /// Path predicate, e.g. `/eazybank/accounts/**`
    pub path: String,
    #[serde(default = "default_rewrite")]
    pub rewrite: String,
    /// `lb://NAME` for a load-balanced backend or a plain base URL
    pub uri: String,
    #[serde(default = "default_route_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    /// Path of a configured fallback used while the breaker is open
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerSettings>,
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    #[serde(default)]
    pub rate_limiter: Option<RateLimiterSettings>,
}

fn default_rewrite() -> String {
    "/${segment}".to_string()
}

fn default_route_timeout() -> u64 {
    4_000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CircuitBreakerSettings {
    /// Failure percentage (0-100] at which the breaker opens
    #[serde(default = "default_failure_rate")]
    pub failure_rate_threshold: f64,
    #[serde(default = "default_window_size")]
    pub sliding_window_size: usize,
    #[serde(default = "default_minimum_calls")]
    pub minimum_number_of_calls: usize,
    #[serde(default = "default_wait_in_open")]
    pub wait_duration_in_open_state_ms: u64,
    #[serde(default = "default_half_open_calls")]
    pub permitted_calls_in_half_open_state: usize,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_rate_threshold: default_failure_rate(),
            sliding_window_size: default_window_size(),
            minimum_number_of_calls: default_minimum_calls(),
            wait_duration_in_open_state_ms: default_wait_in_open(),
            permitted_calls_in_half_open_state: default_half_open_calls(),
        }
    }
}

fn default_failure_rate() -> f64 {
    50.0
}

fn default_window_size() -> usize {
    10
}

fn default_minimum_calls() -> usize {
    10
}

fn default_wait_in_open() -> u64 {
    10_000
}

fn default_half_open_calls() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetrySettings {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub backoff_mode: BackoffMode,
    /// Overall budget for all attempts of one request
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            methods: default_retry_methods(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            factor: default_factor(),
            backoff_mode: BackoffMode::default(),
            deadline_ms: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_retry_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    1_000
}

fn default_factor() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimiterSettings {
    /// Burst size
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_refill")]
    pub refill_per_second: f64,
    /// Request header identifying the caller
    #[serde(default = "default_key_header")]
    pub key_header: String,
    /// Key callers by socket address when the header is absent
    #[serde(default)]
    pub key_by_client_addr: bool,
    #[serde(default = "default_key")]
    pub default_key: String,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_second: default_refill(),
            key_header: default_key_header(),
            key_by_client_addr: false,
            default_key: default_key(),
        }
    }
}

fn default_capacity() -> u32 {
    1
}

fn default_refill() -> f64 {
    1.0
}

fn default_key_header() -> String {
    "user".to_string()
}

fn default_key() -> String {
    "anonymous".to_string()
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_str().ok_or_else(|| {
            GatewayError::config(format!("config path {:?} is not valid UTF-8", path.as_ref()))
        })?;

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .add_source(File::with_name(path).required(false))
            // Override with environment variables (prefixed with GATEWAY_)
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(GatewayError::config("Server port cannot be 0"));
        }

        if !["json", "pretty", "text"].contains(&self.logging.format.as_str()) {
            return Err(GatewayError::config(format!(
                "Unknown log format '{}'. Must be 'json', 'pretty' or 'text'",
                self.logging.format
            )));
        }

        self.gateway.validate()
    }
}

impl GatewayConfig {
    /// Sections wired into long-lived components at startup. A refresh that
    /// changes any of them is refused.
    pub fn startup_only_changes(&self, other: &GatewayConfig) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.correlation_header != other.correlation_header {
            changed.push("correlation_header");
        }
        if self.rate_limit_sweep_interval_ms != other.rate_limit_sweep_interval_ms {
            changed.push("rate_limit_sweep_interval_ms");
        }
        if self.load_balancing != other.load_balancing {
            changed.push("load_balancing");
        }
        if self.backends != other.backends {
            changed.push("backends");
        }
        changed
    }

    /// Validate backends, fallbacks and every route definition
    pub fn validate(&self) -> Result<()> {
        if self.correlation_header.trim().is_empty() {
            return Err(GatewayError::config("correlation_header cannot be empty"));
        }
        if self.rate_limit_sweep_interval_ms == 0 {
            return Err(GatewayError::config(
                "rate_limit_sweep_interval_ms must be greater than 0",
            ));
        }

        for backend in &self.backends {
            if backend.name.is_empty() {
                return Err(GatewayError::config("Backend name cannot be empty"));
            }
            if backend.endpoints.is_empty() {
                return Err(GatewayError::config(format!(
                    "Backend '{}' must have at least one endpoint",
                    backend.name
                )));
            }
        }

        RouteTable::from_config(self).map(|_| ())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
            gateway: GatewayConfig::default(),
        }
    }
}
