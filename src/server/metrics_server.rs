// src/server/metrics_server.rs

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::core::metrics::gather_metrics;
use crate::core::state::ProxyState;

/// Handles HTTP requests to the `/metrics` endpoint, updating the
/// topology-derived gauges before encoding the registry.
async fn metrics_handler(state: Arc<ProxyState>) -> impl IntoResponse {
    crate::core::metrics::SLOTS_ASSIGNED.set(state.slot_table.slots_num() as f64);
    crate::core::metrics::INSTANCES_KNOWN.set(state.registry.len() as f64);

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Runs a minimal HTTP server exposing Prometheus metrics on `/metrics`.
pub async fn run_metrics_server(
    state: Arc<ProxyState>,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "Prometheus metrics server listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind metrics server");
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await
        .unwrap();
}
