//! Authorization errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Authorization errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No session token was presented.
    #[error("missing session token")]
    MissingSession,

    /// The token did not resolve to an active session.
    #[error("session is not active")]
    SessionNotActive,

    /// The session lacks the required role. Deliberately carries no detail
    /// about which privilege check failed.
    #[error("access denied")]
    AccessDenied,

    /// Internal error.
    #[error("internal auth error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::MissingSession => (StatusCode::UNAUTHORIZED, "not_logged_in"),
            AuthError::SessionNotActive => (StatusCode::UNAUTHORIZED, "not_logged_in"),
            AuthError::AccessDenied => (StatusCode::FORBIDDEN, "access_denied"),
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(AuthErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        let err = AuthError::MissingSession;
        assert_eq!(err.to_string(), "missing session token");

        let err = AuthError::AccessDenied;
        assert_eq!(err.to_string(), "access denied");
    }

    #[test]
    fn test_denial_is_uniform() {
        // The denial message must not reveal which role predicate failed.
        assert_eq!(AuthError::AccessDenied.to_string(), "access denied");
    }
}
