//! Account registration, login and profile management.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    auth::{self, TokenIssuer},
    error::{is_unique_violation, Result, ServiceError},
    models::{User, UserStats},
    repository::UserRepository,
    validate,
};

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserRepository>,
    tokens: TokenIssuer,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>, tokens: TokenIssuer) -> Self {
        Self { users, tokens }
    }

    /// Create an account and return it with a fresh session token.
    pub async fn register(&self, email: &str, password: &str) -> Result<(User, String)> {
        if !validate::is_valid_email(email) {
            return Err(ServiceError::InvalidEmail);
        }
        if !validate::is_valid_password(password) {
            return Err(ServiceError::InvalidPassword);
        }
        if self.users.get_by_email(email).await?.is_some() {
            return Err(ServiceError::UserExists);
        }

        let password_hash = hash_blocking(password).await?;
        let user = self
            .users
            .create(email, &password_hash, Utc::now())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ServiceError::UserExists
                } else {
                    e.into()
                }
            })?;

        tracing::info!(user_id = user.id, "user registered");
        let token = self.tokens.issue(user.id, &user.email)?;
        Ok((user, token))
    }

    /// Check credentials and issue a token. An unknown email and a wrong
    /// password produce the same error.
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, String)> {
        let Some(user) = self.users.get_by_email(email).await? else {
            return Err(ServiceError::InvalidCredentials);
        };

        if !verify_blocking(password, &user.password_hash).await? {
            return Err(ServiceError::InvalidCredentials);
        }

        let token = self.tokens.issue(user.id, &user.email)?;
        Ok((user, token))
    }

    pub async fn profile(&self, user_id: i64) -> Result<User> {
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    /// Change the account email. The new address may already belong to the
    /// requester, but not to anybody else.
    pub async fn update_profile(&self, user_id: i64, email: Option<&str>) -> Result<User> {
        let email = email.filter(|e| !e.is_empty());
        if email.is_some_and(|e| !validate::is_valid_email(e)) {
            return Err(ServiceError::InvalidEmail);
        }

        let mut user = self.profile(user_id).await?;

        if let Some(email) = email {
            if let Some(existing) = self.users.get_by_email(email).await? {
                if existing.id != user_id {
                    return Err(ServiceError::UserExists);
                }
            }
            user.email = email.to_owned();
        }

        user.updated_at = Utc::now();
        self.users.update(&user).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::UserExists
            } else {
                e.into()
            }
        })?;

        Ok(user)
    }

    /// Replace the password once the current one has been verified.
    pub async fn change_password(&self, user_id: i64, old: &str, new: &str) -> Result<()> {
        let mut user = self.profile(user_id).await?;

        if !verify_blocking(old, &user.password_hash).await? {
            return Err(ServiceError::InvalidCredentials);
        }
        if !validate::is_valid_password(new) {
            return Err(ServiceError::InvalidPassword);
        }

        user.password_hash = hash_blocking(new).await?;
        user.updated_at = Utc::now();
        self.users.update(&user).await?;

        tracing::info!(user_id, "password changed");
        Ok(())
    }

    pub async fn stats(&self, user_id: i64) -> Result<UserStats> {
        self.profile(user_id).await?;
        Ok(self.users.stats(user_id, Utc::now()).await?)
    }

    /// Remove the account and every link it owns. Requires the password.
    pub async fn delete_account(&self, user_id: i64, password: &str) -> Result<()> {
        let user = self.profile(user_id).await?;

        if !verify_blocking(password, &user.password_hash).await? {
            return Err(ServiceError::InvalidCredentials);
        }

        if !self.users.delete(user_id).await? {
            return Err(ServiceError::UserNotFound);
        }

        tracing::info!(user_id, "account deleted");
        Ok(())
    }
}

// Argon2 hashing runs on the blocking pool.

async fn hash_blocking(password: &str) -> Result<String> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| ServiceError::PasswordHash(e.to_string()))?
}

async fn verify_blocking(password: &str, hash: &str) -> Result<bool> {
    let (password, hash) = (password.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(|e| ServiceError::PasswordHash(e.to_string()))?
}
