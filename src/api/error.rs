//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// API error type with structured responses.
///
/// Variants follow the outcomes a caller can distinguish: bad input,
/// missing resources, failed child processes, and backend trouble. Raw OS
/// and database detail stays in the server log.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External process failed: {0}")]
    ExternalProcess(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Storage unavailable: {0}")]
    Persistence(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ExternalProcess(_) => StatusCode::BAD_GATEWAY,
            Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::ExternalProcess(_) => "EXTERNAL_PROCESS_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Categorize an anyhow error from the service layer.
    ///
    /// Service errors carry human-readable messages; the phrasing decides
    /// the outward category. Anything unrecognized is an internal error and
    /// its message is not echoed to the caller.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let msg = err.to_string();
        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("not found") {
            Self::NotFound(msg)
        } else if msg_lower.contains("already") {
            Self::Conflict(msg)
        } else if msg_lower.contains("invalid")
            || msg_lower.contains("must be")
            || msg_lower.contains("at least")
            || msg_lower.contains("identical")
        {
            Self::Validation(msg)
        } else if msg_lower.contains("script") || msg_lower.contains("spawn") {
            Self::ExternalProcess(msg)
        } else if msg_lower.contains("archive")
            || msg_lower.contains("log directory")
            || msg_lower.contains("log file")
        {
            Self::Io(msg)
        } else {
            error!(error = ?err, "Unhandled service error");
            Self::Internal("An unexpected error occurred".to_string())
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_anyhow(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(status = %status, error = %self, "API error");
        } else {
            warn!(status = %status, error = %self, "API request failed");
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: self.error_code(),
        };

        (status, Json(body)).into_response()
    }
}

/// Shorthand for handler results.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_anyhow_categorization() {
        let err = ApiError::from_anyhow(anyhow::anyhow!("Configuration not found: 7"));
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = ApiError::from_anyhow(anyhow::anyhow!("Login 'bob' is already taken."));
        assert!(matches!(err, ApiError::Conflict(_)));

        let err = ApiError::from_anyhow(anyhow::anyhow!("Invalid configuration: port must be set."));
        assert!(matches!(err, ApiError::Validation(_)));

        let err = ApiError::from_anyhow(anyhow::anyhow!("Pre-launch script failed"));
        assert!(matches!(err, ApiError::ExternalProcess(_)));
    }

    #[test]
    fn test_internal_detail_is_not_echoed() {
        let err = ApiError::from_anyhow(anyhow::anyhow!("sqlite wal checkpoint wedged"));
        match err {
            ApiError::Internal(msg) => assert!(!msg.contains("sqlite")),
            other => panic!("expected internal error, got {other:?}"),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::validation("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::not_found("x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ExternalProcess("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Persistence("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
