use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type
///
/// Every variant renders as `{"success": false, "error": ..., "error_code": ...}`,
/// the shape inbox clients expect for any failed operation.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Request Errors =====
    #[error("{0}")]
    Validation(String),

    // ===== Authentication Errors =====
    #[error(transparent)]
    Auth(#[from] AuthError),

    // ===== Storage Errors =====
    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { receiver, id } => {
                AppError::NotFound(format!("no message {} for {}", id, receiver))
            }
            StoreError::Unsupported { backend, operation } => AppError::Unsupported(format!(
                "{} is not available on the {} message store",
                operation, backend
            )),
            other => AppError::Storage(other.to_string()),
        }
    }
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(e) if e.is_fault() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-facing error message (without backend details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Storage(_) => "Storage error".to_string(),
            other => other.to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Auth(e) => e.error_code(),
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unsupported(_) => "UNSUPPORTED",
            AppError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Authentication failed"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let body = json!({
            "success": false,
            "error": self.user_message(),
            "error_code": self.error_code(),
        });

        (status, axum::Json(body)).into_response()
    }
}
