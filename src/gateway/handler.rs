use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::constants::RAGLINE_CACHE_HEADER;
use crate::embedding::BatcherStats;
use crate::gateway::error::GatewayError;
use crate::gateway::state::HandlerState;
use crate::vectordb::VectorStore;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct WarmRequest {
    pub queries: Vec<String>,
}

#[derive(Serialize)]
pub struct CacheStatsResponse {
    pub result_cache: CacheStats,
    pub embedding_cache: BatcherStats,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

#[instrument(skip(state, request), fields(request_id = tracing::field::Empty))]
pub async fn query_handler<S: VectorStore>(
    State(state): State<HandlerState<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, GatewayError> {
    let request_id = Uuid::new_v4();
    tracing::Span::current().record("request_id", tracing::field::display(&request_id));

    let response = state.service.handle(&request.query).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        RAGLINE_CACHE_HEADER,
        HeaderValue::from_static(response.cache_status.as_header_value()),
    );
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    Ok((StatusCode::OK, headers, Json(response)).into_response())
}

pub async fn cache_stats_handler<S: VectorStore>(
    State(state): State<HandlerState<S>>,
) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        result_cache: state.service.cache_stats(),
        embedding_cache: state.service.batcher_stats(),
    })
}

#[instrument(skip(state))]
pub async fn cache_clear_handler<S: VectorStore>(
    State(state): State<HandlerState<S>>,
) -> Json<ClearResponse> {
    Json(ClearResponse {
        cleared: state.service.clear_cache(),
    })
}

#[instrument(skip(state, request), fields(count = request.queries.len()))]
pub async fn cache_warm_handler<S: VectorStore>(
    State(state): State<HandlerState<S>>,
    Json(request): Json<WarmRequest>,
) -> Response {
    let report = state.service.warm(&request.queries).await;
    Json(report).into_response()
}

pub async fn pool_stats_handler<S: VectorStore>(State(state): State<HandlerState<S>>) -> Response {
    Json(state.service.pool_stats()).into_response()
}

pub async fn metrics_snapshot_handler<S: VectorStore>(
    State(state): State<HandlerState<S>>,
) -> Response {
    Json(state.service.metrics_snapshot()).into_response()
}

pub async fn alerts_handler<S: VectorStore>(State(state): State<HandlerState<S>>) -> Response {
    Json(state.service.alerts()).into_response()
}

pub async fn prometheus_handler<S: VectorStore>(State(state): State<HandlerState<S>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.service.metrics_text(),
    )
        .into_response()
}
