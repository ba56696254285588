//! Per-route, per-caller token-bucket rate limiting using the Governor crate
//!
//! Each route with a limiter owns one keyed Governor limiter; every caller
//! key gets its own bucket inside it. Governor's GCRA state is updated with
//! a single compare-and-swap per check, so refill and deduction happen as one
//! atomic step and concurrent callers can never be over-admitted.
//!
//! Buckets are created lazily. A background sweep drops every bucket that has
//! fully refilled, since such a bucket is indistinguishable from a new one.
//! An idle key is therefore purged at most `capacity / refill rate` plus one
//! sweep interval after its last request.

use axum::http::{HeaderMap, HeaderName};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RateLimiterSettings;
use crate::error::{GatewayError, Result};

/// Derives the bucket key from a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyResolver {
    pub header: HeaderName,
    pub by_client_addr: bool,
    pub default_key: String,
}

impl KeyResolver {
    /// Header value if present, else the client address (when enabled), else the default key
    pub fn resolve(&self, headers: &HeaderMap, client_addr: Option<SocketAddr>) -> String {
        let from_header = headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(key) = from_header {
            return key.to_string();
        }
        match client_addr {
            Some(addr) if self.by_client_addr => addr.ip().to_string(),
            _ => self.default_key.clone(),
        }
    }
}

/// Validated limiter configuration of a route
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Burst size
    pub capacity: NonZeroU32,
    pub refill_per_second: f64,
    pub key: KeyResolver,
}

impl RateLimiterConfig {
    pub fn from_settings(settings: &RateLimiterSettings) -> Result<Self> {
        let capacity = NonZeroU32::new(settings.capacity)
            .ok_or_else(|| GatewayError::config("rate limiter capacity must be at least 1"))?;
        if !settings.refill_per_second.is_finite() || settings.refill_per_second <= 0.0 {
            return Err(GatewayError::config(format!(
                "rate limiter refill_per_second must be positive, got {}",
                settings.refill_per_second
            )));
        }
        let header = HeaderName::from_bytes(settings.key_header.as_bytes()).map_err(|e| {
            GatewayError::config(format!(
                "rate limiter key_header '{}': {}",
                settings.key_header, e
            ))
        })?;
        if settings.default_key.is_empty() {
            return Err(GatewayError::config("rate limiter default_key cannot be empty"));
        }

        let config = Self {
            capacity,
            refill_per_second: settings.refill_per_second,
            key: KeyResolver {
                header,
                by_client_addr: settings.key_by_client_addr,
                default_key: settings.default_key.clone(),
            },
        };
        config.quota()?;
        Ok(config)
    }

    /// Governor quota: one token every `1 / refill` seconds, bursting to capacity
    pub fn quota(&self) -> Result<Quota> {
        let period = Duration::try_from_secs_f64(1.0 / self.refill_per_second).map_err(|e| {
            GatewayError::config(format!(
                "rate limiter refill_per_second {} is too low: {}",
                self.refill_per_second, e
            ))
        })?;
        Quota::with_period(period)
            .map(|quota| quota.allow_burst(self.capacity))
            .ok_or_else(|| {
                GatewayError::config(format!(
                    "rate limiter refill_per_second {} is too high",
                    self.refill_per_second
                ))
            })
    }
}

/// Token buckets of one route, keyed by caller
pub struct RouteRateLimiter {
    config: RateLimiterConfig,
    buckets: DefaultKeyedRateLimiter<String>,
}

impl RouteRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self> {
        let buckets = RateLimiter::keyed(config.quota()?);
        Ok(Self { config, buckets })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Refill, then take one token from `key`'s bucket if a whole token is available
    pub fn try_acquire(&self, key: &str) -> bool {
        self.buckets.check_key(&key.to_string()).is_ok()
    }

    /// Drop fully refilled buckets, returning how many remain
    pub fn sweep(&self) -> usize {
        self.buckets.retain_recent();
        self.buckets.shrink_to_fit();
        self.buckets.len()
    }

    /// Number of live buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Rate limiters keyed by route id, created lazily
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: DashMap<String, Arc<RouteRateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter for `route_id`, created with `config` on first use.
    /// A limiter built from a different configuration is replaced.
    pub fn get_or_create(
        &self,
        route_id: &str,
        config: &RateLimiterConfig,
    ) -> Result<Arc<RouteRateLimiter>> {
        if let Some(limiter) = self.limiters.get(route_id) {
            if limiter.config() == config {
                return Ok(limiter.clone());
            }
        }

        let limiter = match self.limiters.entry(route_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().config() != config {
                    entry.insert(Arc::new(RouteRateLimiter::new(config.clone())?));
                }
                entry.get().clone()
            }
            Entry::Vacant(entry) => entry
                .insert(Arc::new(RouteRateLimiter::new(config.clone())?))
                .clone(),
        };
        debug!(route = %route_id, "Rate limiter ready");
        Ok(limiter)
    }

    /// Convenience for `get_or_create(..).try_acquire(key)`
    pub fn try_acquire(&self, route_id: &str, key: &str, config: &RateLimiterConfig) -> Result<bool> {
        Ok(self.get_or_create(route_id, config)?.try_acquire(key))
    }

    /// Keep only limiters whose route still exists with the same configuration
    pub fn retain<F>(&self, keep: F)
    where
        F: Fn(&str, &RateLimiterConfig) -> bool,
    {
        self.limiters.retain(|id, limiter| keep(id, limiter.config()));
    }

    /// Purge idle buckets across all routes, returning the number still live
    pub fn sweep(&self) -> usize {
        self.limiters.iter().map(|limiter| limiter.sweep()).sum()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Start the background sweep task
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let live = registry.sweep();
                debug!(live_buckets = live, "Swept idle rate-limit buckets");
            }
        });
        info!(
            interval_ms = interval.as_millis() as u64,
            "Started rate-limit bucket sweeper"
        );
        handle
    }
}
