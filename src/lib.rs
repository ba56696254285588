//! Resilient API Gateway
//!
//! A single entry point in front of a set of backend services: it matches
//! inbound paths to routes, rewrites them, and forwards them to a
//! load-balanced backend under per-route rate limiting, circuit breaking
//! and retries.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod resilience;

pub use error::{GatewayError, Result};

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use gateway::Gateway;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<RwLock<config::Settings>>,
    pub gateway: Arc<Gateway>,
    /// File the route table is reloaded from
    pub config_path: PathBuf,
}
