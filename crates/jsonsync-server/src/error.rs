use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid file path requested: {0}")]
    InvalidName(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<jsonsync_core::Error> for ApiError {
    fn from(err: jsonsync_core::Error) -> Self {
        use jsonsync_core::Error;

        match err {
            Error::InvalidName(name) => ApiError::InvalidName(name),
            Error::NotFound(name) => ApiError::NotFound(name),
            err @ Error::Corrupt { .. } => ApiError::Corrupt(err.to_string()),
            Error::Io(e) => ApiError::Io(e.to_string()),
            Error::Watch(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::InvalidName(_) => (StatusCode::BAD_REQUEST, "INVALID_NAME"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Corrupt(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CORRUPT"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::warn!(code = error_code, error = %self, "request failed");
        }

        let body = Json(json!({
            "code": error_code,
            "detail": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
