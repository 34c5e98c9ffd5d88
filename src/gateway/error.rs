use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::service::QueryError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error")]
    InternalError(String),
}

impl From<QueryError> for GatewayError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidInput { reason } => GatewayError::InvalidRequest(reason),
            QueryError::UpstreamUnavailable { component, .. } => {
                GatewayError::Unavailable(format!("{component} is not responding, try again later"))
            }
            QueryError::Internal { reason } => GatewayError::InternalError(reason),
        }
    }
}

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InternalError(detail) => {
                error!(detail = %detail, "Internal error while serving request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
