use std::sync::Arc;

use danci_adaptive::adaptive::store::{load_catalog_file, InMemoryItemCatalog, InMemoryResponseLog};
use danci_adaptive::adaptive::{AdaptiveConfig, AdaptiveEngine};
use danci_adaptive::config::Config;
use danci_adaptive::logging::init_tracing;
use danci_adaptive::workers::{WorkerManager, WorkerSettings};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level, config.log_dir.as_deref());

    let items = match config.item_catalog_path {
        Some(ref path) => match load_catalog_file(path) {
            Ok(items) => items,
            Err(err) => {
                tracing::error!(error = %err, path = %path.display(), "failed to load item catalog");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("ITEM_CATALOG_PATH not set, starting with an empty catalog");
            Vec::new()
        }
    };

    let adaptive_config = AdaptiveConfig::from_env();
    let engine = Arc::new(AdaptiveEngine::new(
        adaptive_config,
        Arc::new(InMemoryItemCatalog::from_items(items)),
        Arc::new(InMemoryResponseLog::new()),
    ));
    tracing::info!("adaptive engine ready");

    let worker_manager = match WorkerManager::new(Arc::clone(&engine), WorkerSettings::from_config(&config)).await {
        Ok(manager) => {
            if let Err(e) = manager.start().await {
                tracing::error!(error = %e, "failed to start workers");
            }
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(error = %e, "worker manager not initialized");
            None
        }
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping workers");

    if let Some(ref manager) = worker_manager {
        manager.stop().await;
    }

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
