use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool,
};

use crate::{
    models::{ClickEvent, Link, LinkStats, NamedCount, NewClick, NewLink, User, UserStats},
    repository::{ClickRepository, LinkRepository, RepoResult, UserRepository},
};

/// SQLite-backed implementation of every repository trait.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating the file if needed) and migrate a database.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let options = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// A private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()?
            .foreign_keys(true);

        // Every connection to :memory: is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Storage form of every timestamp: UTC, nanosecond precision, `Z` suffix.
///
/// The width never varies, so columns compare and sort as plain text.
pub fn stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// `click_count = click_count + by` in one statement.
async fn add_clicks<'e, E>(executor: E, link_id: i64, by: i64) -> RepoResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE links SET click_count = click_count + ?1 WHERE id = ?2")
        .bind(by)
        .bind(link_id)
        .execute(executor)
        .await?;
    Ok(())
}

// ── Links ──────────────────────────────────────────────────────────────────

#[async_trait]
impl LinkRepository for SqliteStore {
    async fn create(&self, link: NewLink) -> RepoResult<Link> {
        let id = sqlx::query(
            "INSERT INTO links (short_code, original_url, user_id, click_count, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5)",
        )
        .bind(&link.short_code)
        .bind(&link.original_url)
        .bind(link.user_id)
        .bind(link.expires_at.map(stamp))
        .bind(stamp(link.created_at))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        sqlx::query_as(
            "SELECT id, short_code, original_url, user_id, click_count, expires_at, created_at, updated_at
             FROM links WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_by_id(&self, id: i64) -> RepoResult<Option<Link>> {
        sqlx::query_as(
            "SELECT id, short_code, original_url, user_id, click_count, expires_at, created_at, updated_at
             FROM links WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_by_short_code(&self, short_code: &str) -> RepoResult<Option<Link>> {
        sqlx::query_as(
            "SELECT id, short_code, original_url, user_id, click_count, expires_at, created_at, updated_at
             FROM links WHERE short_code = ?1",
        )
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await
    }

    async fn exists_by_short_code(&self, short_code: &str) -> RepoResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM links WHERE short_code = ?1)")
            .bind(short_code)
            .fetch_one(&self.pool)
            .await
    }

    async fn list_by_user(&self, user_id: i64, offset: i64, limit: i64) -> RepoResult<Vec<Link>> {
        sqlx::query_as(
            "SELECT id, short_code, original_url, user_id, click_count, expires_at, created_at, updated_at
             FROM links
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn update_expiration(
        &self,
        id: i64,
        expires_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<Option<Link>> {
        sqlx::query("UPDATE links SET expires_at = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(expires_at.map(stamp))
            .bind(stamp(updated_at))
            .bind(id)
            .execute(&self.pool)
            .await?;

        LinkRepository::get_by_id(self, id).await
    }

    async fn delete(&self, id: i64) -> RepoResult<bool> {
        let affected = sqlx::query("DELETE FROM links WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> RepoResult<u64> {
        let affected = sqlx::query(
            "DELETE FROM links
             WHERE expires_at IS NOT NULL AND expires_at < ?1",
        )
        .bind(stamp(before))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }
}

// ── Clicks ─────────────────────────────────────────────────────────────────

#[async_trait]
impl ClickRepository for SqliteStore {
    async fn record(&self, click: NewClick) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO link_clicks
                 (link_id, ip_address, user_agent, referer, browser, os, device,
                  country, city, clicked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(click.link_id)
        .bind(&click.ip_address)
        .bind(&click.user_agent)
        .bind(&click.referer)
        .bind(&click.browser)
        .bind(&click.os)
        .bind(click.device.as_str())
        .bind(&click.country)
        .bind(&click.city)
        .bind(stamp(click.clicked_at))
        .execute(&mut *tx)
        .await?;

        add_clicks(&mut *tx, click.link_id, 1).await?;

        tx.commit().await
    }

    async fn stats(
        &self,
        link_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepoResult<LinkStats> {
        let (from, to) = (stamp(from), stamp(to));

        let total_clicks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM link_clicks
             WHERE link_id = ?1 AND clicked_at BETWEEN ?2 AND ?3",
        )
        .bind(link_id)
        .bind(&from)
        .bind(&to)
        .fetch_one(&self.pool)
        .await?;

        let unique_clicks: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT ip_address) FROM link_clicks
             WHERE link_id = ?1 AND clicked_at BETWEEN ?2 AND ?3",
        )
        .bind(link_id)
        .bind(&from)
        .bind(&to)
        .fetch_one(&self.pool)
        .await?;

        let by_date: Vec<(String, i64)> = sqlx::query_as(
            "SELECT date(clicked_at) AS day, COUNT(*)
             FROM link_clicks
             WHERE link_id = ?1 AND clicked_at BETWEEN ?2 AND ?3
             GROUP BY day",
        )
        .bind(link_id)
        .bind(&from)
        .bind(&to)
        .fetch_all(&self.pool)
        .await?;

        let clicks_by_country: Vec<NamedCount> = sqlx::query_as(
            "SELECT COALESCE(NULLIF(country, ''), 'Unknown') AS name, COUNT(*) AS count
             FROM link_clicks
             WHERE link_id = ?1 AND clicked_at BETWEEN ?2 AND ?3
             GROUP BY name
             ORDER BY count DESC, name ASC
             LIMIT 10",
        )
        .bind(link_id)
        .bind(&from)
        .bind(&to)
        .fetch_all(&self.pool)
        .await?;

        let by_device: Vec<(String, i64)> = sqlx::query_as(
            "SELECT device, COUNT(*)
             FROM link_clicks
             WHERE link_id = ?1 AND clicked_at BETWEEN ?2 AND ?3
             GROUP BY device",
        )
        .bind(link_id)
        .bind(&from)
        .bind(&to)
        .fetch_all(&self.pool)
        .await?;

        let top_referers: Vec<NamedCount> = sqlx::query_as(
            "SELECT COALESCE(NULLIF(referer, ''), 'Direct') AS name, COUNT(*) AS count
             FROM link_clicks
             WHERE link_id = ?1 AND clicked_at BETWEEN ?2 AND ?3
             GROUP BY name
             ORDER BY count DESC, name ASC
             LIMIT 5",
        )
        .bind(link_id)
        .bind(&from)
        .bind(&to)
        .fetch_all(&self.pool)
        .await?;

        Ok(LinkStats {
            link_id,
            total_clicks,
            unique_clicks,
            clicks_by_date: by_date.into_iter().collect::<BTreeMap<_, _>>(),
            clicks_by_country,
            clicks_by_device: by_device.into_iter().collect::<BTreeMap<_, _>>(),
            top_referers,
        })
    }

    async fn recent(&self, link_id: i64, limit: i64) -> RepoResult<Vec<ClickEvent>> {
        sqlx::query_as(
            "SELECT id, link_id, ip_address, user_agent, referer, browser, os, device,
                    country, city, clicked_at
             FROM link_clicks
             WHERE link_id = ?1
             ORDER BY clicked_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(link_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

// ── Users ──────────────────────────────────────────────────────────────────

#[async_trait]
impl UserRepository for SqliteStore {
    async fn create(
        &self,
        email: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<User> {
        let id = sqlx::query(
            "INSERT INTO users (email, password_hash, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        )
        .bind(email)
        .bind(password_hash)
        .bind(stamp(now))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        sqlx::query_as(
            "SELECT id, email, password_hash, created_at, updated_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_by_id(&self, id: i64) -> RepoResult<Option<User>> {
        sqlx::query_as(
            "SELECT id, email, password_hash, created_at, updated_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        sqlx::query_as(
            "SELECT id, email, password_hash, created_at, updated_at FROM users WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update(&self, user: &User) -> RepoResult<()> {
        sqlx::query(
            "UPDATE users SET email = ?1, password_hash = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(stamp(user.updated_at))
        .bind(user.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Owned links (and their clicks) are removed by `ON DELETE CASCADE`.
    async fn delete(&self, id: i64) -> RepoResult<bool> {
        let affected = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn stats(&self, user_id: i64, now: DateTime<Utc>) -> RepoResult<UserStats> {
        let (total_links, total_clicks, active_links): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(click_count), 0),
                    COALESCE(SUM(CASE
                        WHEN expires_at IS NULL OR expires_at >= ?2 THEN 1
                        ELSE 0
                    END), 0)
             FROM links
             WHERE user_id = ?1",
        )
        .bind(user_id)
        .bind(stamp(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(UserStats {
            user_id,
            total_links,
            total_clicks,
            active_links,
        })
    }
}
