use std::sync::Arc;

use axum::{Json, extract::State};

use crate::{
    AppState,
    types::{HealthResponse, ServiceInfo},
};

pub async fn service_info(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
    let config = state.coordinator().config();
    Json(ServiceInfo {
        name: "tgcm",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        max_in_flight: config.max_in_flight,
        send_interval_ms: config.send_interval.as_millis(),
    })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
