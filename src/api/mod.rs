//! HTTP surface: admin endpoints plus the catch-all proxy

pub mod handlers;
pub mod routes;
