//! Web server module: a JSON status API over the store and monitor.

mod handlers;

pub use handlers::*;

use crate::db::Store;
use crate::monitor::Monitor;

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
    pub store: Arc<Store>,
    pub monitor: Arc<Monitor>,
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/api/targets", get(handlers::handle_get_targets))
        .route("/api/statistics/{target}", get(handlers::handle_get_statistics))
        .route("/api/metrics", get(handlers::handle_get_metrics))
        .route("/api/alerts", get(handlers::handle_get_alerts))
        .route("/api/alerts/{id}/acknowledge", post(handlers::handle_acknowledge_alert))
        .route("/api/quality/{target}", get(handlers::handle_get_quality))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}

/// Status API server.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, store: Arc<Store>, monitor: Arc<Monitor>) -> Self {
        Self {
            port,
            state: AppState { store, monitor },
        }
    }

    /// Bind the configured port.
    pub async fn bind(&self) -> std::io::Result<tokio::net::TcpListener> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web server listening on {}", addr);
        Ok(listener)
    }

    /// Serve requests on `listener` until the process exits.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        axum::serve(listener, router(self.state)).await?;
        Ok(())
    }
}
