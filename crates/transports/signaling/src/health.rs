//! HTTP health endpoint
//!
//! `GET /health` reports `{status, activeEndpoints, waitingCount, uptimeSeconds}`.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tandem_core::{Registry, RegistryStats};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

/// Body of the health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub stats: RegistryStats,
}

/// Build the health router
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(registry)
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::cors::CorsLayer::permissive()),
        )
}

async fn health_handler(State(registry): State<Arc<Registry>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stats: registry.stats(),
    })
}

/// Serve the health router on `listener` until shutdown is signalled
pub(crate) async fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> crate::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("Health endpoint listening on http://{}/health", addr);

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| crate::Error::ServerError(format!("Health server error: {}", e)))?;

    info!("Health endpoint stopped");
    Ok(())
}
