use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::flow::FlowStatus;

/// Failures of the flow store and manager.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("flow not found: {0}")]
    NotFound(String),
    #[error("flow already exists: {0}")]
    AlreadyExists(String),
    #[error("flow {key} is already {current}")]
    InvalidTransition { key: String, current: FlowStatus },
    #[error("invalid ttl: {0}")]
    InvalidTtl(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("timed out waiting for flow {0}")]
    Timeout(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl FlowError {
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        Self::Storage(err.to_string())
    }

    /// Stable short tag recorded on failed flows.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::NotFound(_) => "not_found",
            FlowError::AlreadyExists(_) => "already_exists",
            FlowError::InvalidTransition { .. } => "invalid_transition",
            FlowError::InvalidTtl(_) => "invalid_ttl",
            FlowError::InvalidArgument(_) => "invalid_argument",
            FlowError::Timeout(_) => "timeout",
            FlowError::Serialization(_) => "serialization",
            FlowError::Storage(_) => "storage_failure",
        }
    }
}

impl From<sqlx::Error> for FlowError {
    fn from(value: sqlx::Error) -> Self {
        FlowError::storage(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct ProblemResponse<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Internal(msg) => {
                error!(error = %msg, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(ProblemResponse { code, message })).into_response()
    }
}

impl From<FlowError> for AppError {
    fn from(value: FlowError) -> Self {
        match value {
            FlowError::NotFound(_) => AppError::NotFound("validation flow not found".to_string()),
            FlowError::AlreadyExists(_) => {
                AppError::Conflict("validation flow already exists".to_string())
            }
            FlowError::InvalidArgument(msg) => AppError::BadRequest(msg),
            other => AppError::internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use super::{AppError, FlowError};
    use crate::flow::FlowStatus;

    #[test]
    fn flow_errors_map_to_http_statuses() {
        let cases = [
            (FlowError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (FlowError::AlreadyExists("k".into()), StatusCode::CONFLICT),
            (FlowError::InvalidArgument("bad".into()), StatusCode::BAD_REQUEST),
            (
                FlowError::InvalidTransition {
                    key: "k".into(),
                    current: FlowStatus::Completed,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (FlowError::Storage("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(FlowError::Timeout("k".into()).kind(), "timeout");
        assert_eq!(FlowError::Storage("x".into()).kind(), "storage_failure");
    }
}
