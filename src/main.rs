//! Wallet transaction coordinator service
//!
//! Exposes the coordinator over HTTP for a single network and keeps submitted
//! transactions reconciled with the chain.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use wallet_txcoord::api::{self, AppState};
use wallet_txcoord::config::Settings;
use wallet_txcoord::metrics::MetricsServer;
use wallet_txcoord::tx::KeyringSigner;
use wallet_txcoord::{ChainProvider, InMemoryStateManager, TransactionController};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting wallet-txcoord v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {} on chain {}",
        settings.service.instance_id, settings.network.chain_id
    );

    let provider = Arc::new(ChainProvider::new(settings.network.clone())?);
    let signer = KeyringSigner::from_env(&settings.wallet.private_key_env)?;
    info!("Signing for {} addresses", signer.addresses().len());

    let state_manager = Arc::new(InMemoryStateManager::new());
    let controller = Arc::new(TransactionController::new(
        state_manager.clone(),
        provider.clone(),
        provider.clone(),
        Arc::new(signer),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            controller: controller.clone(),
            state_manager: state_manager.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Reconcile submitted transactions
    let tracker_handle = tokio::spawn({
        let controller = controller.clone();
        let period = Duration::from_millis(settings.service.pending_poll_interval_ms);
        async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                match controller.update_pending_transactions().await {
                    Ok(0) => {}
                    Ok(updated) => info!("Updated {} pending transactions", updated),
                    Err(e) => error!("Error updating pending transactions: {}", e),
                }
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let provider = provider.clone();
        let period = Duration::from_secs(settings.service.health_check_interval_secs);
        async move {
            loop {
                tokio::time::sleep(period).await;
                if !provider.health_check().await {
                    warn!("Chain {} health check failed", provider.chain_id());
                }
            }
        }
    });

    info!("wallet-txcoord is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    tracker_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("wallet-txcoord stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wallet_txcoord=debug,hyper=warn"));

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
