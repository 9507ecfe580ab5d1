//! Session-scoped authorization.
//!
//! Provides the process-wide session store (opaque token -> role flags,
//! fixed at login time) and the axum middleware/extractors that gate
//! mutating operations on moderator or admin privilege.

mod error;
mod middleware;
mod store;

pub use error::AuthError;
pub use middleware::{
    CurrentSession, RequireAdmin, RequireModerator, SESSION_COOKIE, auth_middleware,
    session_from_headers,
};
pub use store::{SessionRecord, SessionStore, StagedSession, StoreError};
