//! Process-wide session store.
//!
//! Maps opaque tokens to a small attribute set (user id, admin flag,
//! moderator flag) cached in memory and written through to sqlite so
//! sessions survive a restart. Attributes are fixed when the session is
//! saved; later role changes to the user never affect an open session.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Length of the opaque session token.
const TOKEN_LEN: usize = 32;

/// Default session lifetime.
const DEFAULT_TTL_HOURS: i64 = 24;

/// Session store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store is unreachable or rejected the write.
    #[error("session persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),

    /// The token does not resolve to a session.
    #[error("session not found")]
    NotFound,
}

/// Attributes bound to a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: i64,
    pub admin: bool,
    pub moderator: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// An existing, unexpired session is active.
    pub fn is_active(&self) -> bool {
        Utc::now() < self.expires_at
    }

    /// Active and carrying the moderator or admin flag.
    pub fn is_moderator(&self) -> bool {
        self.is_active() && (self.moderator || self.admin)
    }

    /// Active and carrying the admin flag.
    pub fn is_admin(&self) -> bool {
        self.is_active() && self.admin
    }
}

/// A session whose attributes are staged but not yet persisted.
///
/// Nothing is visible to other requests until [`SessionStore::save`] runs.
#[derive(Debug, Clone)]
pub struct StagedSession {
    token: String,
    user_id: i64,
    admin: bool,
    moderator: bool,
}

impl StagedSession {
    /// The token that must be delivered back to the caller.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Stage the user id.
    pub fn set_user_id(&mut self, user_id: i64) {
        self.user_id = user_id;
    }

    /// Stage the admin flag.
    pub fn set_admin(&mut self, admin: bool) {
        self.admin = admin;
    }

    /// Stage the moderator flag.
    pub fn set_moderator(&mut self, moderator: bool) {
        self.moderator = moderator;
    }
}

/// Concurrency-safe session store shared across all in-flight requests.
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<DashMap<String, SessionRecord>>,
    pool: SqlitePool,
    ttl: Duration,
}

impl SessionStore {
    /// Create a new store backed by the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
            pool,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }

    /// Override the session lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mint a new session with a fresh opaque token. The session is not
    /// visible (and the token not valid) until `save` succeeds.
    pub fn new_session(&self) -> StagedSession {
        StagedSession {
            token: nanoid::nanoid!(TOKEN_LEN),
            user_id: 0,
            admin: false,
            moderator: false,
        }
    }

    /// Durably persist a staged session and make it visible.
    pub async fn save(&self, staged: StagedSession) -> Result<SessionRecord, StoreError> {
        let now = Utc::now();
        let record = SessionRecord {
            user_id: staged.user_id,
            admin: staged.admin,
            moderator: staged.moderator,
            created_at: now,
            expires_at: now + self.ttl,
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (token, user_id, admin, moderator, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (token) DO UPDATE SET
                user_id = excluded.user_id,
                admin = excluded.admin,
                moderator = excluded.moderator,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&staged.token)
        .bind(record.user_id)
        .bind(record.admin)
        .bind(record.moderator)
        .bind(record.created_at.to_rfc3339())
        .bind(record.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.cache.insert(staged.token.clone(), record.clone());
        debug!(user_id = record.user_id, "Saved session");

        Ok(record)
    }

    /// Resolve a token. Falls back to the backing table so sessions created
    /// before a restart keep working.
    pub async fn get(&self, token: &str) -> Option<SessionRecord> {
        if let Some(record) = self.cache.get(token) {
            return Some(record.clone());
        }

        let (user_id, admin, moderator, created_at, expires_at) =
            sqlx::query_as::<_, (i64, bool, bool, String, String)>(
                "SELECT user_id, admin, moderator, created_at, expires_at FROM sessions WHERE token = ?",
            )
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|err| {
                warn!("Session lookup failed: {:?}", err);
                None
            })?;

        let record = SessionRecord {
            user_id,
            admin,
            moderator,
            created_at: parse_timestamp(&created_at)?,
            expires_at: parse_timestamp(&expires_at)?,
        };

        self.cache.insert(token.to_string(), record.clone());
        Some(record)
    }

    /// Invalidate a token. Subsequent lookups report the session inactive.
    pub async fn destroy(&self, token: &str) -> Result<(), StoreError> {
        self.cache.remove(token);

        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    /// Is the token bound to an active session? Safe on unresolvable tokens.
    pub async fn is_active(&self, token: &str) -> bool {
        self.get(token).await.is_some_and(|r| r.is_active())
    }

    /// Is the token bound to an active moderator-or-admin session?
    pub async fn is_moderator(&self, token: &str) -> bool {
        self.get(token).await.is_some_and(|r| r.is_moderator())
    }

    /// Is the token bound to an active admin session?
    pub async fn is_admin(&self, token: &str) -> bool {
        self.get(token).await.is_some_and(|r| r.is_admin())
    }

    /// Drop expired rows from the backing table and cache.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        self.cache.retain(|_, record| record.expires_at > now);

        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
