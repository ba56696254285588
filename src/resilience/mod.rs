//! Resilience module - Circuit breaking, retries and rate limiting

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;
