//! Bounded retry with exponential backoff

use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{GatewayError, Result};

/// How the backoff factor compounds between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    /// `delay(n) = min(max, delay(n-1) * factor)`, starting from the initial backoff
    #[default]
    Previous,
    /// `delay(n) = min(max, initial * factor^(n-1))`
    Initial,
}

/// Validated retry policy of a route
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Methods eligible for retry
    pub methods: Vec<Method>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub factor: f64,
    pub mode: BackoffMode,
    /// Overall time budget across all attempts of one request
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings, attempt_timeout: Duration) -> Result<Self> {
        if settings.max_attempts == 0 {
            return Err(GatewayError::config("retry max_attempts must be at least 1"));
        }
        if !settings.factor.is_finite() || settings.factor < 1.0 {
            return Err(GatewayError::config(format!(
                "retry factor must be a finite number >= 1, got {}",
                settings.factor
            )));
        }
        if settings.initial_backoff_ms > settings.max_backoff_ms {
            return Err(GatewayError::config(format!(
                "retry initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                settings.initial_backoff_ms, settings.max_backoff_ms
            )));
        }

        let methods = settings
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| GatewayError::config(format!("unknown retry method '{}'", m)))
            })
            .collect::<Result<Vec<_>>>()?;

        let max_backoff = Duration::from_millis(settings.max_backoff_ms);
        let deadline = match settings.deadline_ms {
            Some(0) => return Err(GatewayError::config("retry deadline_ms must be greater than 0")),
            Some(ms) => Duration::from_millis(ms),
            None => attempt_timeout
                .checked_mul(settings.max_attempts)
                .zip(max_backoff.checked_mul(settings.max_attempts - 1))
                .and_then(|(attempts, backoffs)| attempts.checked_add(backoffs))
                .ok_or_else(|| {
                    GatewayError::config(format!(
                        "retry budget of {} attempts with max_backoff_ms {} overflows; set deadline_ms",
                        settings.max_attempts, settings.max_backoff_ms
                    ))
                })?,
        };

        Ok(Self {
            max_attempts: settings.max_attempts,
            methods,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff,
            factor: settings.factor,
            mode: settings.backoff_mode,
            deadline,
        })
    }

    /// Whether requests with `method` may be retried at all
    pub fn applies_to(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Delay before retry number `retry` (1-based) when computed from the base value
    pub fn backoff_from_initial(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.factor.powi(exponent);
        cap(delay, self.max_backoff)
    }
}

fn cap(delay_secs: f64, max: Duration) -> Duration {
    if !delay_secs.is_finite() || delay_secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(delay_secs)
    }
}

/// Per-request retry bookkeeping
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt currently being made, starting at 1
    pub attempt: u32,
    /// Delay to wait before the next attempt
    pub next_delay: Duration,
    pub deadline: Instant,
}

impl RetryContext {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            next_delay: policy.initial_backoff,
            deadline: deadline_after(policy.deadline),
        }
    }

    /// Advance to the next attempt, returning the delay to wait first, or
    /// `None` when attempts or time are exhausted.
    pub fn advance(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        if self.attempt >= policy.max_attempts {
            return None;
        }

        let delay = match policy.mode {
            BackoffMode::Previous => self.next_delay,
            BackoffMode::Initial => policy.backoff_from_initial(self.attempt),
        };
        let ready_at = Instant::now().checked_add(delay);
        if ready_at.map_or(true, |at| at >= self.deadline) {
            return None;
        }

        self.next_delay = cap(delay.as_secs_f64() * policy.factor, policy.max_backoff);
        self.attempt += 1;
        Some(delay)
    }
}

/// `now + budget`, clamped to roughly thirty years out
fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// Classified result of a single attempt
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    /// Final result: success or a client error
    Complete(T),
    /// Timeout, connection failure or server error
    Transient(T),
    /// Stop immediately without retrying
    Abort(T),
}

/// Final result of [`execute`]
#[derive(Debug)]
pub struct Executed<T> {
    pub value: T,
    pub attempts: u32,
    /// Last attempt failed transiently and the budget ran out
    pub exhausted: bool,
}

/// Run `call` under `policy`, retrying transient failures with backoff.
///
/// Without a policy, or when `method` is not eligible, exactly one attempt
/// is made. The closure receives the 1-based attempt number.
pub async fn execute<T, F, Fut>(policy: Option<&RetryPolicy>, method: &Method, mut call: F) -> Executed<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let policy = policy.filter(|p| p.applies_to(method));
    let mut context = policy.map(RetryContext::new);
    let mut attempt = 1;

    loop {
        match call(attempt).await {
            AttemptOutcome::Complete(value) => {
                return Executed {
                    value,
                    attempts: attempt,
                    exhausted: false,
                }
            }
            AttemptOutcome::Abort(value) => {
                debug!(attempt, "Retry aborted");
                return Executed {
                    value,
                    attempts: attempt,
                    exhausted: false,
                };
            }
            AttemptOutcome::Transient(value) => {
                let next = match (policy, context.as_mut()) {
                    (Some(policy), Some(context)) => context.advance(policy),
                    _ => None,
                };
                match next {
                    Some(delay) => {
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Transient failure, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        if policy.is_some() {
                            warn!(attempts = attempt, "Retries exhausted");
                        }
                        return Executed {
                            value,
                            attempts: attempt,
                            exhausted: true,
                        };
                    }
                }
            }
        }
    }
}
