use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// The constant 401 used for any secret that does not resolve to a key.
    /// Malformed and unknown secrets must be indistinguishable to the caller.
    pub fn invalid_api_key() -> Self {
        AppError::Unauthenticated("Invalid API key".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthenticated(msg) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthenticated",
                msg.clone(),
            ),
            AppError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "forbidden",
                msg.clone(),
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                format!("{} not found", what),
            ),
            AppError::InvalidArgument(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_argument",
                msg.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
