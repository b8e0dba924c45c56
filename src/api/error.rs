use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Request-level failure taxonomy. Everything a handler can fail with maps
/// onto one of these, and each renders a `message` body.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The persistence session itself broke. Rendered with a fixed message
    /// and the underlying detail as a traceback.
    #[error("session error")]
    Session { trace: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError::NotFound(what.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Session(trace) => ApiError::Session { trace },
            StoreError::Other(err) => ApiError::Internal(format!("{err:#}")),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Session { trace } => {
                log::error!("session error: {trace}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"message": "session error", "traceback": trace})),
                )
                    .into_response()
            }
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(json!({"message": format!("{what} not found")})),
            )
                .into_response(),
            ApiError::Internal(message) => {
                log::error!("request failed: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"message": message})),
                )
                    .into_response()
            }
        }
    }
}
