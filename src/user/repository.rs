//! User repository for database operations.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::models::User;

/// Repository for user database operations.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Create a new user repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new user and return it.
    #[instrument(skip(self, password_hash))]
    pub async fn create(
        &self,
        login: &str,
        email: &str,
        password_hash: &str,
        admin: bool,
        moderator: bool,
    ) -> Result<User> {
        debug!("Creating user: {}", login);

        let result = sqlx::query(
            r#"
            INSERT INTO users (login, email, password_hash, admin, moderator)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(login)
        .bind(email)
        .bind(password_hash)
        .bind(admin)
        .bind(moderator)
        .execute(&self.pool)
        .await
        .context("Failed to insert user")?;

        let id = result.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User not found after creation"))
    }

    /// Update an existing user. An empty `password_hash` keeps the stored one.
    #[instrument(skip(self, password_hash))]
    pub async fn update(
        &self,
        id: i64,
        login: &str,
        email: &str,
        password_hash: Option<&str>,
        admin: bool,
        moderator: bool,
    ) -> Result<User> {
        if let Some(hash) = password_hash {
            sqlx::query(
                r#"
                UPDATE users
                SET login = ?, email = ?, password_hash = ?, admin = ?, moderator = ?
                WHERE id = ?
                "#,
            )
            .bind(login)
            .bind(email)
            .bind(hash)
            .bind(admin)
            .bind(moderator)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update user")?;
        } else {
            sqlx::query(
                r#"
                UPDATE users
                SET login = ?, email = ?, admin = ?, moderator = ?
                WHERE id = ?
                "#,
            )
            .bind(login)
            .bind(email)
            .bind(admin)
            .bind(moderator)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update user")?;
        }

        self.get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User not found: {}", id))
    }

    /// Get a user by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, login, email, password_hash, admin, moderator, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        Ok(user)
    }

    /// Get a user by login name or email address.
    #[instrument(skip(self))]
    pub async fn get_by_identifier(&self, identifier: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, login, email, password_hash, admin, moderator, created_at
            FROM users
            WHERE login = ? OR email = ?
            "#,
        )
        .bind(identifier)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by identifier")?;

        Ok(user)
    }

    /// List all users ordered by login.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, login, email, password_hash, admin, moderator, created_at
            FROM users
            ORDER BY login
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        Ok(users)
    }

    /// Delete a user by id. Returns whether a row was removed.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete user")?;

        Ok(result.rows_affected() > 0)
    }

    /// Check that a login is not taken by a different user.
    pub async fn is_login_available(&self, login: &str, exclude_id: i64) -> Result<bool> {
        let existing = self.get_by_identifier(login).await?;
        Ok(existing.is_none_or(|u| u.id == exclude_id))
    }

    /// Count all users.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?;

        Ok(count)
    }
}
