//! Application error type shared by every handler and service.
//!
//! Operational errors carry a caller-facing message. `Internal` wraps the root
//! cause, which is logged here and never echoed back to the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    /// Duplicate or state-conflicting write. Reported as 400, like validation.
    #[error("{0}")]
    Conflict(String),

    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn missing_fields() -> Self {
        AppError::BadRequest("Missing required fields".into())
    }

    pub fn date_out_of_range() -> Self {
        AppError::BadRequest("Resulting date is out of range".into())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound     => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden    => StatusCode::FORBIDDEN,
            AppError::Internal(_)  => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "VALIDATION_ERROR",
            AppError::Conflict(_)   => "CONFLICT",
            AppError::NotFound      => "NOT_FOUND",
            AppError::Unauthorized  => "UNAUTHORIZED",
            AppError::Forbidden     => "FORBIDDEN",
            AppError::Internal(_)   => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if crate::db::is_busy(&err) {
            tracing::warn!(error = %err, "Write lost a lock race");
            return AppError::Conflict("Another update to the same records is in progress, retry".into());
        }
        AppError::Internal(anyhow::Error::new(err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(err) => {
                tracing::error!(error = ?err, "Internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message, "code": self.code() }))).into_response()
    }
}
