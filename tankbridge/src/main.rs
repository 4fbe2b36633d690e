use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use std::sync::Arc;
use tankbridge::cache::TelemetryCache;
use tankbridge::config::{Args, Config};
use tankbridge::dispatch::Dispatcher;
use tankbridge::fetcher::HttpFetcher;
use tankbridge::metrics;
use tankbridge::rest::{self, AppState};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Missing identity aborts here
    let config = Config::load(args).context("invalid configuration")?;

    info!("Starting water tank bridge '{}'", config.name);
    info!("Device: {} (user {})", config.device.device_id, config.device.user_id);
    info!("Provider: {}", config.device.api_url);
    info!("HTTP server: {}", config.http_addr);

    metrics::init_metrics().context("failed to register metrics")?;

    let fetcher =
        HttpFetcher::new(config.request_timeout).context("failed to build HTTP client")?;
    let cache = TelemetryCache::new(
        config.device.clone(),
        config.cache_expiry(),
        Arc::new(fetcher),
    );
    let state = AppState {
        name: config.name.clone(),
        dispatcher: Dispatcher::new(cache),
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
