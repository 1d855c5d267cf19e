//! Storage capability boundary.
//!
//! The services only see these traits. [`crate::db::SqliteStore`] is the
//! production implementation; anything able to honour the same contracts
//! (unique short codes and emails, clicks counted together with their event) can stand in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ClickEvent, Link, LinkStats, NewClick, NewLink, User, UserStats};

pub type RepoResult<T> = Result<T, sqlx::Error>;

#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Insert a link. A taken short code surfaces as a unique violation.
    async fn create(&self, link: NewLink) -> RepoResult<Link>;

    async fn get_by_id(&self, id: i64) -> RepoResult<Option<Link>>;

    async fn get_by_short_code(&self, short_code: &str) -> RepoResult<Option<Link>>;

    async fn exists_by_short_code(&self, short_code: &str) -> RepoResult<bool>;

    /// Newest first.
    async fn list_by_user(&self, user_id: i64, offset: i64, limit: i64) -> RepoResult<Vec<Link>>;

    /// Set the expiry (None clears it) and bump `updated_at`.
    async fn update_expiration(
        &self,
        id: i64,
        expires_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<Option<Link>>;

    /// Hard delete; returns whether a row went away.
    async fn delete(&self, id: i64) -> RepoResult<bool>;

    /// Delete links whose expiry lies before `before`.
    async fn delete_expired(&self, before: DateTime<Utc>) -> RepoResult<u64>;
}

#[async_trait]
pub trait ClickRepository: Send + Sync {
    /// Append the event and add one to the link counter as a single unit.
    async fn record(&self, click: NewClick) -> RepoResult<()>;

    /// Aggregate events with `from <= clicked_at <= to`.
    async fn stats(
        &self,
        link_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepoResult<LinkStats>;

    /// The latest `limit` events for a link, newest first.
    async fn recent(&self, link_id: i64, limit: i64) -> RepoResult<Vec<ClickEvent>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user. A taken email surfaces as a unique violation.
    async fn create(
        &self,
        email: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<User>;

    async fn get_by_id(&self, id: i64) -> RepoResult<Option<User>>;

    async fn get_by_email(&self, email: &str) -> RepoResult<Option<User>>;

    /// Persist email, password hash and `updated_at`.
    async fn update(&self, user: &User) -> RepoResult<()>;

    /// Delete the account; owned links go with it.
    async fn delete(&self, id: i64) -> RepoResult<bool>;

    async fn stats(&self, user_id: i64, now: DateTime<Utc>) -> RepoResult<UserStats>;
}
