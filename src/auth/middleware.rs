//! Session middleware and role extractors.

use axum::{
    extract::{FromRequestParts, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};

use super::error::AuthError;
use super::store::{SessionRecord, SessionStore};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "paddock_session";

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Option<&str> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next()?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = parts.next()?;
    if token.is_empty() || parts.next().is_some() {
        return None;
    }

    Some(token)
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Pull the session token out of request headers: Authorization bearer
/// first, then the session cookie.
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token_from_header)
    {
        return Some(token.to_string());
    }

    headers
        .get(axum::http::header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookie_header| token_from_cookie_header(cookie_header, SESSION_COOKIE))
        .map(str::to_string)
}

/// Resolve the active session for a request, if any.
///
/// Used directly by public endpoints (check-session, logout) that must not
/// hard-fail on an anonymous caller.
pub async fn session_from_headers(
    store: &SessionStore,
    headers: &HeaderMap,
) -> Option<CurrentSession> {
    let token = token_from_headers(headers)?;
    let record = store.get(&token).await?;

    if !record.is_active() {
        return None;
    }

    Some(CurrentSession { token, record })
}

/// Active session extracted from the request.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    /// Opaque session token the caller presented.
    pub token: String,
    /// Attribute set fixed at login time.
    pub record: SessionRecord,
}

impl CurrentSession {
    /// The authenticated user id.
    pub fn user_id(&self) -> i64 {
        self.record.user_id
    }

    /// Moderator-or-above privilege.
    pub fn is_moderator(&self) -> bool {
        self.record.is_moderator()
    }

    /// Admin privilege.
    pub fn is_admin(&self) -> bool {
        self.record.is_admin()
    }
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or(AuthError::MissingSession)
    }
}

/// Session middleware.
///
/// Resolves the presented token against the session store and injects
/// `CurrentSession` into request extensions. Requests without an active
/// session are rejected before any handler runs.
pub async fn auth_middleware(
    State(store): State<SessionStore>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let token = token_from_headers(req.headers()).ok_or(AuthError::MissingSession)?;

    let record = store
        .get(&token)
        .await
        .filter(|r| r.is_active())
        .ok_or(AuthError::SessionNotActive)?;

    req.extensions_mut().insert(CurrentSession { token, record });

    Ok(next.run(req).await)
}

/// Require moderator-or-above privilege.
///
/// Use as an extractor in handlers that mutate instances or configurations.
/// Rejection is the uniform access-denied response.
#[derive(Debug, Clone)]
pub struct RequireModerator(pub CurrentSession);

impl<S> FromRequestParts<S> for RequireModerator
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or(AuthError::MissingSession)?;

        if !session.is_moderator() {
            return Err(AuthError::AccessDenied);
        }

        Ok(RequireModerator(session))
    }
}

/// Require admin privilege.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub CurrentSession);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or(AuthError::MissingSession)?;

        if !session.is_admin() {
            return Err(AuthError::AccessDenied);
        }

        Ok(RequireAdmin(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_from_header_valid() {
        assert_eq!(
            bearer_token_from_header("Bearer abc123").unwrap(),
            "abc123"
        );
        assert_eq!(
            bearer_token_from_header("bearer   token456").unwrap(),
            "token456"
        );
    }

    #[test]
    fn test_bearer_token_from_header_invalid() {
        let cases = ["", "Bearer", "Bearer ", "Token x", "Bearer token extra"];
        for case in cases {
            assert!(
                bearer_token_from_header(case).is_none(),
                "{case} should fail"
            );
        }
    }

    #[test]
    fn test_token_from_cookie_header() {
        let header = "theme=dark; paddock_session=tok123; lang=en";
        assert_eq!(
            token_from_cookie_header(header, SESSION_COOKIE),
            Some("tok123")
        );
        assert_eq!(token_from_cookie_header("theme=dark", SESSION_COOKIE), None);
    }
}
