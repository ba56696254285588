//! Per-route circuit breaker
//!
//! ```text
//! Closed  → Open:     failure rate over the sliding window reaches the threshold
//! Open    → HalfOpen: wait duration elapsed, checked on the next acquisition
//! HalfOpen → Closed:  the permitted number of trial calls succeeded
//! HalfOpen → Open:    any trial call failed
//! ```
//!
//! All counters and transitions of one breaker live behind a single mutex,
//! so two requests can never both decide the same transition. Breakers of
//! different routes share nothing.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerSettings;
use crate::error::{GatewayError, Result};

/// Validated breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Percentage in (0, 100]
    pub failure_rate_threshold: f64,
    pub sliding_window_size: usize,
    pub minimum_number_of_calls: usize,
    pub wait_duration_in_open_state: Duration,
    pub permitted_calls_in_half_open_state: usize,
}

impl CircuitBreakerConfig {
    pub fn from_settings(settings: &CircuitBreakerSettings) -> Result<Self> {
        if !(settings.failure_rate_threshold > 0.0 && settings.failure_rate_threshold <= 100.0) {
            return Err(GatewayError::config(format!(
                "failure_rate_threshold must be in (0, 100], got {}",
                settings.failure_rate_threshold
            )));
        }
        if settings.sliding_window_size == 0 {
            return Err(GatewayError::config("sliding_window_size must be at least 1"));
        }
        if settings.minimum_number_of_calls == 0
            || settings.minimum_number_of_calls > settings.sliding_window_size
        {
            return Err(GatewayError::config(format!(
                "minimum_number_of_calls must be between 1 and sliding_window_size ({}), got {}",
                settings.sliding_window_size, settings.minimum_number_of_calls
            )));
        }
        if settings.permitted_calls_in_half_open_state == 0 {
            return Err(GatewayError::config(
                "permitted_calls_in_half_open_state must be at least 1",
            ));
        }

        Ok(Self {
            failure_rate_threshold: settings.failure_rate_threshold,
            sliding_window_size: settings.sliding_window_size,
            minimum_number_of_calls: settings.minimum_number_of_calls,
            wait_duration_in_open_state: Duration::from_millis(
                settings.wait_duration_in_open_state_ms,
            ),
            permitted_calls_in_half_open_state: settings.permitted_calls_in_half_open_state,
        })
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        // Defaults are known to validate
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_number_of_calls: 10,
            wait_duration_in_open_state: Duration::from_secs(10),
            permitted_calls_in_half_open_state: 2,
        }
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are short-circuited to the fallback
    Open,
    /// A limited number of trial calls pass through
    HalfOpen,
}

/// Outcome of one call as seen by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub total_calls: usize,
    pub failure_count: usize,
    pub success_count: usize,
    pub failure_rate: f64,
}

struct BreakerState {
    state: CircuitState,
    /// Bumped on every transition; outcomes from an older generation are dropped
    generation: u64,
    /// Sliding window of outcomes, `true` for a failure
    window: VecDeque<bool>,
    failure_count: usize,
    half_open_successes: usize,
    half_open_in_flight: usize,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            window: VecDeque::new(),
            failure_count: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            opened_at: None,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.failure_count as f64 * 100.0 / self.window.len() as f64
        }
    }
}

/// Circuit breaker guarding one route
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Ask for permission to make one call.
    ///
    /// Returns `None` when the call must be short-circuited. The returned
    /// permit must be completed with [`Permit::record`]; dropping it without
    /// an outcome gives back a half-open trial slot and records nothing.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|opened| opened.elapsed())
                .unwrap_or_default();
            if elapsed < self.config.wait_duration_in_open_state {
                debug!(breaker = %self.name, "Circuit open, call rejected");
                return None;
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        match inner.state {
            CircuitState::Closed => Some(Permit::new(self.clone(), inner.generation, false)),
            CircuitState::HalfOpen => {
                let used = inner.half_open_in_flight + inner.half_open_successes;
                if used < self.config.permitted_calls_in_half_open_state {
                    inner.half_open_in_flight += 1;
                    Some(Permit::new(self.clone(), inner.generation, true))
                } else {
                    debug!(breaker = %self.name, "Half-open trial slots exhausted, call rejected");
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    fn record(&self, generation: u64, trial: bool, outcome: CallOutcome) {
        let mut inner = self.inner.lock();

        if inner.generation != generation {
            debug!(
                breaker = %self.name,
                outcome = ?outcome,
                "Ignoring outcome recorded against a previous breaker state"
            );
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                let failed = outcome == CallOutcome::Failure;
                inner.window.push_back(failed);
                if failed {
                    inner.failure_count += 1;
                }
                if inner.window.len() > self.config.sliding_window_size {
                    if let Some(true) = inner.window.pop_front() {
                        inner.failure_count -= 1;
                    }
                }

                if inner.window.len() >= self.config.minimum_number_of_calls
                    && inner.failure_rate() >= self.config.failure_rate_threshold
                {
                    warn!(
                        breaker = %self.name,
                        failure_rate = inner.failure_rate(),
                        calls = inner.window.len(),
                        "Failure rate threshold reached, opening circuit"
                    );
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                if trial {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
                match outcome {
                    CallOutcome::Success => {
                        inner.half_open_successes += 1;
                        if inner.half_open_successes
                            >= self.config.permitted_calls_in_half_open_state
                        {
                            self.transition(&mut inner, CircuitState::Closed);
                        }
                    }
                    CallOutcome::Failure => {
                        warn!(breaker = %self.name, "Trial call failed, reopening circuit");
                        self.transition(&mut inner, CircuitState::Open);
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    fn release(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {}
            CircuitState::Closed => {
                inner.window.clear();
                inner.failure_count = 0;
                inner.opened_at = None;
            }
        }

        info!(breaker = %self.name, from = ?from, to = ?to, "Circuit breaker state transition");
    }

    /// Snapshot of the current window
    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.inner.lock();
        let total_calls = inner.window.len();
        CircuitMetrics {
            state: inner.state,
            total_calls,
            failure_count: inner.failure_count,
            success_count: total_calls - inner.failure_count,
            failure_rate: inner.failure_rate(),
        }
    }
}

/// Permission to make one call through a breaker
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    completed: bool,
}

impl Permit {
    fn new(breaker: Arc<CircuitBreaker>, generation: u64, trial: bool) -> Self {
        Self {
            breaker,
            generation,
            trial,
            completed: false,
        }
    }

    /// Whether this is a half-open trial call
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, outcome: CallOutcome) {
        self.completed = true;
        self.breaker.record(self.generation, self.trial, outcome);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.completed && self.trial {
            self.breaker.release(self.generation);
        }
    }
}

/// Breakers keyed by route id, created lazily
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaker for `route_id`, created with `config` on first use.
    /// A breaker built from a different configuration is replaced.
    pub fn get_or_create(&self, route_id: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(route_id) {
            if breaker.config() == config {
                return breaker.clone();
            }
        }

        let mut entry = self
            .breakers
            .entry(route_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(route_id, config.clone())));
        if entry.config() != config {
            *entry = Arc::new(CircuitBreaker::new(route_id, config.clone()));
        }
        debug!(route = %route_id, "Circuit breaker ready");
        entry.clone()
    }

    pub fn get(&self, route_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(route_id).map(|b| b.clone())
    }

    /// Keep only breakers whose route still exists with the same configuration
    pub fn retain<F>(&self, keep: F)
    where
        F: Fn(&str, &CircuitBreakerConfig) -> bool,
    {
        self.breakers.retain(|id, breaker| keep(id, breaker.config()));
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
