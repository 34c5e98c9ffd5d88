//! HTTP gateway (Axum) in front of the query service.
//!
//! This module is primarily used by the `ragline` server binary.

pub mod error;
pub mod handler;
pub mod state;


use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

pub use error::GatewayError;
pub use handler::{QueryRequest, REQUEST_ID_HEADER, query_handler};
pub use state::HandlerState;

use crate::vectordb::VectorStore;

pub fn create_router_with_state<S: VectorStore>(state: HandlerState<S>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler::<S>))
        .route("/v1/query", post(query_handler::<S>))
        .route("/metrics", get(handler::prometheus_handler::<S>))
        .route("/admin/cache/stats", get(handler::cache_stats_handler::<S>))
        .route("/admin/cache/clear", post(handler::cache_clear_handler::<S>))
        .route("/admin/cache/warm", post(handler::cache_warm_handler::<S>))
        .route("/admin/pool/stats", get(handler::pool_stats_handler::<S>))
        .route("/admin/metrics", get(handler::metrics_snapshot_handler::<S>))
        .route("/admin/alerts", get(handler::alerts_handler::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(serde::Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub components: ComponentStatus,
}

#[derive(serde::Serialize)]
pub struct ComponentStatus {
    pub http: &'static str,
    pub pool: &'static str,
    pub embedding: &'static str,
}

/// Returns whether `GET {base_url}/healthz` answers with a success status
/// within `timeout`. Used by the container health check.
pub async fn check_health(base_url: &str, timeout: std::time::Duration) -> bool {
    let Ok(client) = reqwest::Client::builder().timeout(timeout).build() else {
        return false;
    };

    match client.get(format!("{}/healthz", base_url)).send().await {
        Ok(res) => res.status().is_success(),
        Err(_) => false,
    }
}

#[tracing::instrument]
pub async fn health_handler() -> Response {
    (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response()
}

#[tracing::instrument(skip(state))]
pub async fn ready_handler<S: VectorStore>(State(state): State<HandlerState<S>>) -> Response {
    let status = |up: bool| if up { "ready" } else { "down" };

    let pool_up = !state.service.pool().is_closed();
    let embedding_up = state.service.batcher().is_running();
    let components = ComponentStatus {
        http: "ready",
        pool: status(pool_up),
        embedding: status(embedding_up),
    };

    let is_ready = pool_up && embedding_up;
    let status_code = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadyResponse {
            status: if is_ready { "ok" } else { "unavailable" },
            components,
        }),
    )
        .into_response()
}
