//! Sword - Distributed Metric Dashboard Server
//!
//! Observers push metric records about targets; the dashboard reads them
//! back as raw series, per-observer summaries, or bucketed statistics.

mod config;
mod db;
mod persistence;
mod scheduler;
mod web;

use config::{MonitorConfig, ServerConfig};
use db::{DataSetRegistry, Store};
use persistence::{DrainOutcome, PersistenceManager};
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sword=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Sword on port {}...", cfg.http_port);
    tracing::info!("Using config file {}", cfg.conf_file);
    tracing::info!("Using database at {}", cfg.db_path);
    if cfg.token.is_empty() {
        tracing::warn!("SWORD_TOKEN is not set; token-protected endpoints accept any empty token");
    }

    let monitor = Arc::new(MonitorConfig::load(&cfg.conf_file)?);
    tracing::info!(
        "Loaded {} targets and {} observers",
        monitor.targets.len(),
        monitor.observers.len()
    );

    // Build datasets and hydrate them before serving
    let registry = Arc::new(DataSetRegistry::new(&monitor));
    if registry.is_empty() {
        tracing::warn!("No target/observer pairs configured");
    }
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database holds {} saved pairs", store.pair_count()?);
    let persistence = Arc::new(PersistenceManager::new(store, registry.clone()));

    let loader = persistence.clone();
    tokio::task::spawn_blocking(move || loader.load_all()).await?;

    let scheduler = Scheduler::new(
        registry.clone(),
        persistence.clone(),
        cfg.retention_sweep_interval,
        cfg.checkpoint_interval,
    );
    scheduler.start();

    let shutdown_grace = cfg.shutdown_grace;
    let server = Server::new(cfg, monitor, registry, persistence.clone());
    let mut serve = tokio::spawn(async move { server.start().await });

    // Whichever fires first starts the single drain
    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut serve => {
            match result {
                Ok(Ok(())) => tracing::info!("Web server stopped"),
                Ok(Err(e)) => tracing::error!("Web server failed: {}", e),
                Err(e) => tracing::error!("Web server task failed: {}", e),
            }
        }
    }

    scheduler.stop();

    match persistence.drain(shutdown_grace).await {
        DrainOutcome::Completed(report) if report.failed == 0 => {
            tracing::info!("Shutdown complete");
        }
        DrainOutcome::Completed(report) => {
            tracing::error!("Shutdown complete, {} pairs were not saved", report.failed);
        }
        DrainOutcome::AlreadyDrained => {}
        DrainOutcome::Failed(_) | DrainOutcome::TimedOut => {
            // A hung save task would keep the runtime from shutting down.
            tracing::error!("Exiting without a complete save");
            std::process::exit(1);
        }
    }

    serve.abort();
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
///
/// SIGKILL cannot be intercepted; checkpoints bound what it loses.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
