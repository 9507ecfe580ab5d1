//! User service for business logic.

use anyhow::{Context, Result, bail};
use tracing::{info, instrument};

use super::models::{AddEditUserRequest, User};
use super::repository::UserRepository;

/// Service for user management operations.
#[derive(Debug, Clone)]
pub struct UserService {
    repo: UserRepository,
}

impl UserService {
    /// Create a new user service.
    pub fn new(repo: UserRepository) -> Self {
        Self { repo }
    }

    /// Create or edit a user with validation.
    #[instrument(skip(self, request), fields(login = %request.login))]
    pub async fn add_edit_user(&self, request: AddEditUserRequest) -> Result<User> {
        if !is_valid_login(&request.login) {
            bail!("Invalid login format. Must be 3-50 alphanumeric characters, underscores, or hyphens.");
        }

        if !is_valid_email(&request.email) {
            bail!("Invalid email format.");
        }

        if !self.repo.is_login_available(&request.login, request.id).await? {
            bail!("Login '{}' is already taken.", request.login);
        }

        if request.pwd1 != request.pwd2 {
            bail!("Passwords must be identical.");
        }

        let password_hash = if request.pwd1.is_empty() {
            None
        } else {
            if request.pwd1.len() < 6 {
                bail!("Password must be at least 6 characters.");
            }
            Some(hash_password(&request.pwd1)?)
        };

        if request.id == 0 {
            let Some(hash) = password_hash else {
                bail!("Password must be set for a new user.");
            };

            let user = self
                .repo
                .create(
                    &request.login,
                    &request.email,
                    &hash,
                    request.admin,
                    request.moderator,
                )
                .await?;
            info!(user_id = user.id, login = %user.login, "Created new user");
            Ok(user)
        } else {
            if self.repo.get(request.id).await?.is_none() {
                bail!("User not found: {}", request.id);
            }

            let user = self
                .repo
                .update(
                    request.id,
                    &request.login,
                    &request.email,
                    password_hash.as_deref(),
                    request.admin,
                    request.moderator,
                )
                .await?;
            info!(user_id = user.id, "Updated user");
            Ok(user)
        }
    }

    /// Verify credentials and return the matching user.
    ///
    /// Role flags on the returned record are what the session will cache;
    /// they are read once here, at login time.
    #[instrument(skip(self, password))]
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Option<User>> {
        let user = self.repo.get_by_identifier(identifier).await?;

        match user {
            Some(user) if verify_password(password, &user.password_hash)? => Ok(Some(user)),
            _ => Ok(None),
        }
    }

    /// Get a user by id.
    #[instrument(skip(self))]
    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.repo.get(id).await
    }

    /// List all users.
    #[instrument(skip(self))]
    pub async fn get_all_users(&self) -> Result<Vec<User>> {
        self.repo.list().await
    }

    /// Delete a user.
    #[instrument(skip(self))]
    pub async fn remove_user(&self, id: i64) -> Result<()> {
        if !self.repo.delete(id).await? {
            bail!("User not found: {}", id);
        }

        info!(user_id = id, "Deleted user");
        Ok(())
    }

    /// Number of existing accounts. Used to seed the first admin.
    pub async fn count(&self) -> Result<i64> {
        self.repo.count().await
    }
}

/// Validate login format.
fn is_valid_login(login: &str) -> bool {
    let len = login.len();
    if !(3..=50).contains(&len) {
        return false;
    }

    login
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Basic email validation.
fn is_valid_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    !parts[0].is_empty() && parts[1].contains('.')
}

/// Hash a password using bcrypt.
fn hash_password(password: &str) -> Result<String> {
    // Lower cost factor keeps debug builds and tests fast
    let cost = if cfg!(debug_assertions) { 4 } else { 10 };
    bcrypt::hash(password, cost).context("Failed to hash password")
}

/// Verify a password against a bcrypt hash.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    bcrypt::verify(password, hash).context("Failed to verify password")
}
