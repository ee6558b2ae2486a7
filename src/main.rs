//! Headwatch - multi-party head control panel backend
//!
//! Connects to every configured party's node, keeps head status and UTXO sets
//! in sync, and serves them over HTTP alongside Prometheus metrics.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use headwatch::metrics::{self, MetricsServer};
use headwatch::{api, HttpHeadNode, Panel, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Headwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} parties",
        settings.enabled_parties().len()
    );

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Start one worker per party
    let panel = Arc::new(Panel::new(
        settings.panel.clone(),
        settings.subscriber.clone(),
    ));
    for (key, party) in settings.enabled_parties() {
        match HttpHeadNode::new(key, party) {
            Ok(node) => {
                panel.track_party(key, &party.address, Arc::new(node))?;
                info!("Party {} ({}) at {}", key, party.name, party.api_url);
            }
            Err(e) => {
                warn!("Skipping party {}: {}", key, e);
                metrics::record_party_connected(key, false);
            }
        }
    }

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let panel = panel.clone();
        async move {
            if let Err(e) = api::run_server(config, panel).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    info!("Headwatch is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    panel.shutdown().await;

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Headwatch stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,headwatch=debug,hyper=warn,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
