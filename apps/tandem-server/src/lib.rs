pub mod cli;
pub mod client_ip;
pub mod config;
pub mod handlers;
pub mod state;
pub mod telemetry;
pub mod websocket;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::handlers::{health_check, metrics, my_ip, pairing_status};
use crate::state::AppState;
use crate::websocket::websocket_handler;

pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/healthz", get(health_check))
        .route("/api/status", get(pairing_status))
        .route("/api/my-ip", get(my_ip))
        .route("/metrics", get(metrics))
        .route("/ws", get(websocket_handler))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let state = AppState::new(config.clone(), metrics);
    let idle_monitor = config
        .idle_timeout
        .map(|timeout| state.hub.clone().spawn_idle_monitor(timeout));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(
        listen_addr = %config.listen_addr,
        notify = ?config.broker.notify_scope,
        displaced = ?config.broker.displaced,
        max_payload_bytes = config.broker.max_payload_bytes,
        "tandem relay listening"
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    if let Some(handle) = idle_monitor {
        handle.abort();
    }
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
