//! Path router: matches inbound paths against the route table and rewrites them

use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::gateway::route::{RouteDefinition, RouteTable};

/// Result of a successful route lookup
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteDefinition>,
    /// Downstream path including the original query string
    pub rewritten_path: String,
}

/// Router holding the current route table snapshot
pub struct Router {
    table: ArcSwap<RouteTable>,
}

impl Router {
    /// Create a new router over an initial table
    pub fn new(table: RouteTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    /// Current snapshot; stays consistent for as long as the caller holds it
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Atomically replace the whole table, returning the previous one
    pub fn replace(&self, table: RouteTable) -> Arc<RouteTable> {
        info!(routes = table.len(), "Route table replaced");
        self.table.swap(Arc::new(table))
    }

    /// Route a path against the current snapshot
    pub fn route(&self, path_and_query: &str) -> Option<RouteMatch> {
        match_route(&self.table.load(), path_and_query)
    }
}

/// Match `path_and_query` against `table`; the first registered route wins
pub fn match_route(table: &RouteTable, path_and_query: &str) -> Option<RouteMatch> {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    for route in table.routes() {
        if let Some(segment) = route.predicate.capture(path) {
            let mut rewritten_path = route.rewrite.render(segment);
            if let Some(query) = query {
                rewritten_path.push('?');
                rewritten_path.push_str(query);
            }

            debug!(
                route = %route.id,
                backend = %route.target.backend_name(),
                rewritten = %rewritten_path,
                "Matched route"
            );

            return Some(RouteMatch {
                route: route.clone(),
                rewritten_path,
            });
        }
    }

    None
}
