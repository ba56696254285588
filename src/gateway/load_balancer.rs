//! Load balancer implementation with multiple strategies

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::backend::traits::Endpoint;
use crate::config::BackendConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::route::Target;

/// Resolves a logical backend name to its live endpoints
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, backend: &str) -> Result<Vec<Endpoint>>;
}

/// Resolver over a fixed endpoint list from configuration.
/// Backend names are matched case-insensitively.
#[derive(Debug, Default)]
pub struct StaticResolver {
    backends: HashMap<String, Vec<Endpoint>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(backends: &[BackendConfig]) -> Self {
        let mut resolver = Self::new();
        for backend in backends {
            resolver.insert(
                &backend.name,
                backend
                    .endpoints
                    .iter()
                    .map(|e| Endpoint::with_weight(e.url.clone(), e.weight))
                    .collect(),
            );
        }
        resolver
    }

    pub fn insert(&mut self, backend: &str, endpoints: Vec<Endpoint>) {
        self.backends.insert(backend.to_ascii_uppercase(), endpoints);
    }

    pub fn with_backend(mut self, backend: &str, endpoints: Vec<Endpoint>) -> Self {
        self.insert(backend, endpoints);
        self
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    async fn resolve(&self, backend: &str) -> Result<Vec<Endpoint>> {
        self.backends
            .get(&backend.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| GatewayError::BackendNotFound(backend.to_string()))
    }
}

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Round-robin distribution
    #[default]
    RoundRobin,
    /// Weighted round-robin based on endpoint weights
    WeightedRoundRobin,
    /// Random selection
    Random,
}

/// State for weighted round-robin algorithm
#[derive(Default)]
struct WeightedRoundRobinState {
    current_index: usize,
    current_weight: i64,
}

/// Load balancer picking one endpoint of a backend per attempt
pub struct LoadBalancer {
    resolver: Arc<dyn EndpointResolver>,
    strategy: LoadBalancingStrategy,
    round_robin_index: DashMap<String, AtomicUsize>,
    weighted_state: DashMap<String, Mutex<WeightedRoundRobinState>>,
}

impl LoadBalancer {
    /// Create a new load balancer
    pub fn new(resolver: Arc<dyn EndpointResolver>) -> Self {
        Self::with_strategy(resolver, LoadBalancingStrategy::default())
    }

    pub fn with_strategy(resolver: Arc<dyn EndpointResolver>, strategy: LoadBalancingStrategy) -> Self {
        Self {
            resolver,
            strategy,
            round_robin_index: DashMap::new(),
            weighted_state: DashMap::new(),
        }
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    /// Select an endpoint for a route target
    pub async fn select_endpoint(&self, target: &Target) -> Result<Endpoint> {
        let backend = match target {
            Target::Direct(url) => return Ok(Endpoint::new(url.clone())),
            Target::LoadBalanced(backend) => backend,
        };

        let endpoints: Vec<Endpoint> = self
            .resolver
            .resolve(backend)
            .await?
            .into_iter()
            .filter(|e| e.weight > 0)
            .collect();

        if endpoints.is_empty() {
            return Err(GatewayError::NoEndpoints(backend.clone()));
        }

        let strategy = self.strategy();
        let selected = match strategy {
            LoadBalancingStrategy::RoundRobin => self.select_round_robin(backend, &endpoints),
            LoadBalancingStrategy::WeightedRoundRobin => {
                self.select_weighted_round_robin(backend, &endpoints)
            }
            LoadBalancingStrategy::Random => Self::select_random(&endpoints),
        };

        debug!(
            backend = %backend,
            endpoint = %selected.url,
            strategy = ?strategy,
            "Selected endpoint for request"
        );

        Ok(selected)
    }

    /// Round-robin selection
    fn select_round_robin(&self, backend: &str, endpoints: &[Endpoint]) -> Endpoint {
        let index = match self.round_robin_index.get(backend) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed),
            None => self
                .round_robin_index
                .entry(backend.to_string())
                .or_insert_with(|| AtomicUsize::new(0))
                .fetch_add(1, Ordering::Relaxed),
        };
        endpoints[index % endpoints.len()].clone()
    }

    /// Weighted round-robin selection
    fn select_weighted_round_robin(&self, backend: &str, endpoints: &[Endpoint]) -> Endpoint {
        if endpoints.len() == 1 {
            return endpoints[0].clone();
        }

        let entry = self
            .weighted_state
            .entry(backend.to_string())
            .or_insert_with(|| Mutex::new(WeightedRoundRobinState::default()));
        let mut state = entry.lock();

        let weights: Vec<i64> = endpoints.iter().map(|e| i64::from(e.weight)).collect();
        let max_weight = weights.iter().copied().max().unwrap_or(1);
        let gcd = weights.iter().fold(0, |acc, &w| gcd(acc, w)).max(1);

        loop {
            state.current_index = (state.current_index + 1) % endpoints.len();

            if state.current_index == 0 {
                state.current_weight -= gcd;
                if state.current_weight <= 0 {
                    state.current_weight = max_weight;
                }
            }

            if weights[state.current_index] >= state.current_weight {
                return endpoints[state.current_index].clone();
            }
        }
    }

    /// Random selection
    fn select_random(endpoints: &[Endpoint]) -> Endpoint {
        let index = rand::thread_rng().gen_range(0..endpoints.len());
        endpoints[index].clone()
    }
}

/// Calculate greatest common divisor
fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a.abs()
    } else {
        gcd(b, a % b)
    }
}
