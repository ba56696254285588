//! Gateway module - Routing, filters, load balancing and the request engine

pub mod engine;
pub mod filters;
pub mod load_balancer;
pub mod route;
pub mod router;

pub use engine::{Gateway, GatewayRequest, GatewayResponse, Outcome, Stage};
pub use filters::{CorrelationFilter, FilterChain, GatewayFilter, RequestContext};
pub use load_balancer::{EndpointResolver, LoadBalancer, LoadBalancingStrategy, StaticResolver};
pub use route::{RouteDefinition, RouteTable};
pub use router::{match_route, RouteMatch, Router};
