use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use tandem_core::StatusSnapshot;

use crate::client_ip;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MyIpResponse {
    pub ip: String,
    pub timestamp: i64,
}

/// GET /healthz
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.hub.len(),
    }))
}

/// GET /api/status - current role occupancy, straight from the registry.
pub async fn pairing_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.broker.status())
}

/// GET /api/my-ip - the caller's address as the relay sees it.
pub async fn my_ip(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<MyIpResponse> {
    Json(MyIpResponse {
        ip: client_ip::resolve(&headers, remote_addr).to_string(),
        timestamp: Utc::now().timestamp_millis(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
