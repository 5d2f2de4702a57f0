use anyhow::{Context, Result};
use ngsi_bridge::api::{start_api_server, AppState};
use ngsi_bridge::catalog::ModalityCatalog;
use ngsi_bridge::config::Config;
use ngsi_bridge::upstream::HttpMeasurementSource;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        upstream = %config.upstream.base_url,
        "Starting NGSI-LD bridge"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let catalog = Arc::new(
        ModalityCatalog::load(config.catalog.path.as_deref())
            .context("Failed to load modality catalog")?,
    );

    let source = Arc::new(
        HttpMeasurementSource::new(&config.upstream)
            .context("Failed to initialize upstream client")?,
    );

    let api_state = AppState {
        catalog,
        source,
        attribute_match: config.api.attribute_match,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Bridge started successfully");

    let api_abort = api_handle.abort_handle();
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutting down bridge");
            api_abort.abort();
        }
        result = api_handle => {
            if let Err(e) = result {
                error!(error = %e, "API server task failed");
            }
        }
    }

    info!("Bridge stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

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
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
