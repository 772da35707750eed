use anyhow::{Context, Result};
use postboard_api::config::StoreBackend;
use postboard_api::{
    start_api_server, AppState, Config, DynamoPostStore, InMemoryPostStore, PostStore,
    S3Presigner, UploadIssuer,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Postboard API"
    );

    init_metrics(config.service.metrics_port)?;

    let posts: Arc<dyn PostStore> = match config.store.backend {
        StoreBackend::Dynamo => Arc::new(DynamoPostStore::new(&config.dynamo).await),
        StoreBackend::Memory => {
            warn!("Using in-memory post store; posts are lost on restart");
            Arc::new(InMemoryPostStore::new())
        }
    };

    let presigner = Arc::new(S3Presigner::new(&config.s3).await);

    let state = AppState {
        posts,
        uploads: Arc::new(UploadIssuer::new(presigner, config.presigned_url_expiry())),
        service_name: config.service.name.clone(),
    };

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Postboard API stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
