//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::{MonitorConfig, ServerConfig};
use crate::db::DataSetRegistry;
use crate::persistence::PersistenceManager;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub monitor: Arc<MonitorConfig>,
    pub registry: Arc<DataSetRegistry>,
    pub persistence: Arc<PersistenceManager>,
}

/// Web server for Sword.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        monitor: Arc<MonitorConfig>,
        registry: Arc<DataSetRegistry>,
        persistence: Arc<PersistenceManager>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                monitor,
                registry,
                persistence,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/conf", get(handlers::handle_conf))
            .route("/api/data", post(handlers::handle_put_data))
            .route("/api/data/abbr", get(handlers::handle_abbr_data))
            .route("/api/data/full", get(handlers::handle_full_data))
            .route("/api/data/stat", get(handlers::handle_stat_data))
            .route("/api/status", get(handlers::handle_status))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
