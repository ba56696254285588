//! Route definitions and the immutable route table

use axum::http::{HeaderName, HeaderValue, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{FallbackConfig, GatewayConfig, RouteConfig};
use crate::error::{GatewayError, Result};
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limit::RateLimiterConfig;
use crate::resilience::retry::RetryPolicy;

const SEGMENT_PLACEHOLDER: &str = "${segment}";
const LOAD_BALANCED_SCHEME: &str = "lb://";

/// Inbound path predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPredicate {
    /// `/prefix/**`: matches the prefix itself and everything below it
    Prefix(String),
    /// Any pattern without a trailing `/**`
    Exact(String),
}

impl PathPredicate {
    pub fn parse(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(GatewayError::config(format!(
                "path predicate '{}' must start with '/'",
                pattern
            )));
        }
        if pattern.contains('?') {
            return Err(GatewayError::config(format!(
                "path predicate '{}' must not contain a query string",
                pattern
            )));
        }

        match pattern.strip_suffix("/**") {
            Some(prefix) if prefix.contains('*') => Err(GatewayError::config(format!(
                "path predicate '{}' may only use '**' as its last segment",
                pattern
            ))),
            Some(prefix) => Ok(PathPredicate::Prefix(prefix.to_string())),
            None if pattern.contains('*') => Err(GatewayError::config(format!(
                "path predicate '{}' may only use '**' as its last segment",
                pattern
            ))),
            None => Ok(PathPredicate::Exact(pattern.to_string())),
        }
    }

    /// Returns the captured remainder when `path` (without query) matches
    pub fn capture<'a>(&self, path: &'a str) -> Option<&'a str> {
        match self {
            PathPredicate::Prefix(prefix) => {
                let rest = path.strip_prefix(prefix.as_str())?;
                if rest.is_empty() {
                    Some("")
                } else {
                    rest.strip_prefix('/')
                }
            }
            PathPredicate::Exact(exact) => (path == exact).then_some(""),
        }
    }

    /// Pattern as it was configured
    pub fn pattern(&self) -> String {
        match self {
            PathPredicate::Prefix(prefix) => format!("{}/**", prefix),
            PathPredicate::Exact(exact) => exact.clone(),
        }
    }
}

/// Downstream path template, e.g. `/${segment}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTemplate(String);

impl RewriteTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        if !template.starts_with('/') {
            return Err(GatewayError::config(format!(
                "rewrite template '{}' must start with '/'",
                template
            )));
        }
        if template.replace(SEGMENT_PLACEHOLDER, "").contains("${") {
            return Err(GatewayError::config(format!(
                "rewrite template '{}' uses an unknown placeholder; only {} is supported",
                template, SEGMENT_PLACEHOLDER
            )));
        }
        Ok(Self(template.to_string()))
    }

    pub fn render(&self, segment: &str) -> String {
        self.0.replace(SEGMENT_PLACEHOLDER, segment)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where a route sends its traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Logical backend resolved through the load balancer
    LoadBalanced(String),
    /// Fixed base URL
    Direct(String),
}

impl Target {
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(name) = uri.strip_prefix(LOAD_BALANCED_SCHEME) {
            if name.is_empty() || name.contains('/') {
                return Err(GatewayError::config(format!(
                    "load-balanced uri '{}' must name a backend, e.g. lb://ACCOUNTS",
                    uri
                )));
            }
            return Ok(Target::LoadBalanced(name.to_string()));
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(Target::Direct(uri.trim_end_matches('/').to_string()));
        }
        Err(GatewayError::config(format!(
            "route uri '{}' must use lb://, http:// or https://",
            uri
        )))
    }

    pub fn uri(&self) -> String {
        match self {
            Target::LoadBalanced(name) => format!("{}{}", LOAD_BALANCED_SCHEME, name),
            Target::Direct(url) => url.clone(),
        }
    }

    /// Backend name used for logging and endpoint resolution
    pub fn backend_name(&self) -> &str {
        match self {
            Target::LoadBalanced(name) => name,
            Target::Direct(url) => url,
        }
    }
}

/// Canned local response served while a route's breaker is open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fallback {
    pub path: String,
    pub status: StatusCode,
    pub message: String,
}

impl Fallback {
    pub fn from_config(config: &FallbackConfig) -> Result<Self> {
        if !config.path.starts_with('/') {
            return Err(GatewayError::config(format!(
                "fallback path '{}' must start with '/'",
                config.path
            )));
        }
        let status = StatusCode::from_u16(config.status).map_err(|_| {
            GatewayError::config(format!(
                "fallback '{}' has invalid status {}",
                config.path, config.status
            ))
        })?;
        Ok(Self {
            path: config.path.clone(),
            status,
            message: config.message.clone(),
        })
    }
}

/// A validated route, immutable once registered
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDefinition {
    pub id: String,
    pub predicate: PathPredicate,
    pub rewrite: RewriteTemplate,
    pub target: Target,
    pub timeout: Duration,
    pub response_headers: Vec<(HeaderName, HeaderValue)>,
    pub fallback: Option<Fallback>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub retry: Option<RetryPolicy>,
    pub rate_limiter: Option<RateLimiterConfig>,
}

impl RouteDefinition {
    pub fn from_config(config: &RouteConfig, fallbacks: &[Fallback]) -> Result<Self> {
        if config.id.trim().is_empty() {
            return Err(GatewayError::config("route id cannot be empty"));
        }
        if config.timeout_ms == 0 {
            return Err(GatewayError::config(format!(
                "route '{}' timeout_ms must be greater than 0",
                config.id
            )));
        }
        let timeout = Duration::from_millis(config.timeout_ms);

        let mut response_headers = Vec::with_capacity(config.response_headers.len());
        for (name, value) in &config.response_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                GatewayError::config(format!("route '{}' header '{}': {}", config.id, name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                GatewayError::config(format!("route '{}' header '{}': {}", config.id, name, e))
            })?;
            response_headers.push((name, value));
        }

        let fallback = match &config.fallback {
            Some(path) => Some(
                fallbacks
                    .iter()
                    .find(|f| &f.path == path)
                    .cloned()
                    .ok_or_else(|| {
                        GatewayError::config(format!(
                            "route '{}' references unknown fallback '{}'",
                            config.id, path
                        ))
                    })?,
            ),
            None => None,
        };

        let with_route = |e: GatewayError| match e {
            GatewayError::Configuration(msg) => {
                GatewayError::config(format!("route '{}': {}", config.id, msg))
            }
            other => other,
        };

        Ok(Self {
            id: config.id.clone(),
            predicate: PathPredicate::parse(&config.path).map_err(with_route)?,
            rewrite: RewriteTemplate::parse(&config.rewrite).map_err(with_route)?,
            target: Target::parse(&config.uri).map_err(with_route)?,
            timeout,
            response_headers,
            fallback,
            circuit_breaker: config
                .circuit_breaker
                .as_ref()
                .map(CircuitBreakerConfig::from_settings)
                .transpose()
                .map_err(with_route)?,
            retry: config
                .retry
                .as_ref()
                .map(|r| RetryPolicy::from_settings(r, timeout))
                .transpose()
                .map_err(with_route)?,
            rate_limiter: config
                .rate_limiter
                .as_ref()
                .map(RateLimiterConfig::from_settings)
                .transpose()
                .map_err(with_route)?,
        })
    }
}

/// Ordered snapshot of routes and fallbacks
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteDefinition>>,
    fallbacks: Vec<Fallback>,
}

impl RouteTable {
    /// Build and validate a table from configuration, preserving route order
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut fallbacks = Vec::with_capacity(config.fallbacks.len());
        for fallback in &config.fallbacks {
            let fallback = Fallback::from_config(fallback)?;
            if fallbacks.iter().any(|f: &Fallback| f.path == fallback.path) {
                return Err(GatewayError::config(format!(
                    "duplicate fallback path '{}'",
                    fallback.path
                )));
            }
            fallbacks.push(fallback);
        }

        let routes = config
            .routes
            .iter()
            .map(|r| RouteDefinition::from_config(r, &fallbacks))
            .collect::<Result<Vec<_>>>()?;

        Self::new(routes, fallbacks)
    }

    pub fn new(routes: Vec<RouteDefinition>, fallbacks: Vec<Fallback>) -> Result<Self> {
        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.id.as_str()) {
                return Err(GatewayError::config(format!(
                    "duplicate route id '{}'",
                    route.id
                )));
            }
        }

        Ok(Self {
            routes: routes.into_iter().map(Arc::new).collect(),
            fallbacks,
        })
    }

    /// Routes in registration order
    pub fn routes(&self) -> &[Arc<RouteDefinition>] {
        &self.routes
    }

    pub fn get(&self, id: &str) -> Option<&Arc<RouteDefinition>> {
        self.routes.iter().find(|r| r.id == id)
    }

    /// Fallback registered at exactly this path
    pub fn fallback(&self, path: &str) -> Option<&Fallback> {
        self.fallbacks.iter().find(|f| f.path == path)
    }

    pub fn fallbacks(&self) -> &[Fallback] {
        &self.fallbacks
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
