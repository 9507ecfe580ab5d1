//! User data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique user id.
    pub id: i64,
    /// Login name.
    pub login: String,
    /// Email address. Personally identifying; redacted for non-admin readers.
    pub email: String,
    /// Bcrypt password hash. Never serialized into responses.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Administrator flag.
    pub admin: bool,
    /// Moderator flag.
    pub moderator: bool,
    /// When the account was created.
    pub created_at: String,
}

/// User record as exposed over the API.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub admin: bool,
    pub moderator: bool,
    pub created_at: String,
}

impl UserInfo {
    /// Strip personally identifying fields for non-admin readers.
    pub fn redacted(mut self) -> Self {
        self.email = String::new();
        self
    }
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            login: user.login,
            email: user.email,
            admin: user.admin,
            moderator: user.moderator,
            created_at: user.created_at,
        }
    }
}

/// Request to create (id = 0) or edit (id > 0) a user.
#[derive(Debug, Clone, Deserialize)]
pub struct AddEditUserRequest {
    #[serde(default)]
    pub id: i64,
    pub login: String,
    pub email: String,
    /// New password; empty on edit keeps the current one.
    #[serde(default)]
    pub pwd1: String,
    /// Password confirmation, must match `pwd1`.
    #[serde(default)]
    pub pwd2: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub moderator: bool,
}
