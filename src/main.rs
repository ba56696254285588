//! Main entry point for the Resilient API Gateway

use resilient_gateway::{
    api,
    backend::HttpUpstream,
    config::Settings,
    gateway::{Gateway, StaticResolver},
    AppState,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Connect timeout of the shared HTTP client; per-route timeouts bound the whole call
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = PathBuf::from(
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    // Load configuration
    let settings = Settings::load_from_path(&config_path)?;
    settings.validate()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));
    let registry = tracing_subscriber::registry().with(filter);
    match settings.logging.format.as_str() {
        "json" => registry.with(fmt::layer().json()).init(),
        "pretty" => registry.with(fmt::layer().pretty()).init(),
        _ => registry.with(fmt::layer()).init(),
    }

    info!("Starting Resilient API Gateway");
    info!(
        "Loaded configuration: server={}:{}, routes={}, backends={}",
        settings.server.host,
        settings.server.port,
        settings.gateway.routes.len(),
        settings.gateway.backends.len()
    );

    let resolver = Arc::new(StaticResolver::from_config(&settings.gateway.backends));
    let upstream = Arc::new(HttpUpstream::new(CONNECT_TIMEOUT)?);
    let gateway = Arc::new(Gateway::from_config(&settings.gateway, resolver, upstream)?);

    // Purge idle rate-limit buckets in the background
    gateway.rate_limiters().start_sweeper(Duration::from_millis(
        settings.gateway.rate_limit_sweep_interval_ms,
    ));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;

    let app_state = Arc::new(AppState {
        settings: Arc::new(RwLock::new(settings)),
        gateway,
        config_path,
    });

    let app = api::routes::create_router(app_state);

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
