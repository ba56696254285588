//! Backend module - Upstream traits and the HTTP client

pub mod http_backend;
pub mod traits;

pub use http_backend::HttpUpstream;
pub use traits::{Endpoint, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};
