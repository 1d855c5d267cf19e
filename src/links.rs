//! Link lifecycle: creation, lookup, ownership checks, clicks and stats.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use woothee::parser::Parser;

use crate::{
    error::{is_unique_violation, Result, ServiceError},
    models::{ClickEvent, DeviceClass, Link, LinkStats, NewClick, NewLink},
    repository::{ClickRepository, LinkRepository},
    shortcode, validate,
};

/// How many random codes are tried before giving up on auto-generation.
pub const MAX_GENERATION_ATTEMPTS: usize = 16;

/// Largest page of raw click events handed out at once.
pub const MAX_RECENT_CLICKS: u32 = 100;

/// Visitor metadata captured at redirect time.
#[derive(Debug, Clone, Default)]
pub struct ClickContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Clone)]
pub struct LinkService {
    links: Arc<dyn LinkRepository>,
    clicks: Arc<dyn ClickRepository>,
    code_length: usize,
}

impl LinkService {
    pub fn new(
        links: Arc<dyn LinkRepository>,
        clicks: Arc<dyn ClickRepository>,
        code_length: usize,
    ) -> Self {
        Self {
            links,
            clicks,
            code_length,
        }
    }

    /// Create a link, either under `custom_code` or a freshly generated code.
    pub async fn create_link(
        &self,
        original_url: &str,
        owner: Option<i64>,
        custom_code: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Link> {
        let original_url = validate::checked_url(original_url).ok_or(ServiceError::InvalidUrl)?;

        let now = Utc::now();
        if expires_at.is_some_and(|exp| exp < now) {
            return Err(ServiceError::ExpirationInPast);
        }

        let new_link = |short_code: String| NewLink {
            short_code,
            original_url: original_url.clone(),
            user_id: owner,
            expires_at,
            created_at: now,
        };

        if let Some(code) = custom_code.filter(|c| !c.is_empty()) {
            if self.links.exists_by_short_code(code).await? {
                return Err(ServiceError::ShortCodeExists);
            }
            // The UNIQUE constraint settles races the existence check can't see.
            return self
                .links
                .create(new_link(code.to_owned()))
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ServiceError::ShortCodeExists
                    } else {
                        e.into()
                    }
                });
        }

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let code = shortcode::generate(self.code_length)?;
            if self.links.exists_by_short_code(&code).await? {
                tracing::debug!(attempt, "generated short code collided, retrying");
                continue;
            }
            match self.links.create(new_link(code)).await {
                Ok(link) => {
                    tracing::info!(id = link.id, code = %link.short_code, "link created");
                    return Ok(link);
                }
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(attempt, "short code taken on insert, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::error!(
            length = self.code_length,
            "short code space exhausted after {} attempts",
            MAX_GENERATION_ATTEMPTS
        );
        Err(ServiceError::CodeSpaceExhausted(MAX_GENERATION_ATTEMPTS))
    }

    /// Public lookup used for redirection. Never mutates the link.
    pub async fn get_link_by_short_code(&self, short_code: &str) -> Result<Link> {
        let link = self
            .links
            .get_by_short_code(short_code)
            .await?
            .ok_or(ServiceError::LinkNotFound)?;

        if link.is_expired_at(Utc::now()) {
            return Err(ServiceError::LinkExpired);
        }

        Ok(link)
    }

    /// Fetch a link on behalf of `requester`, who must own it.
    pub async fn get_link(&self, id: i64, requester: i64) -> Result<Link> {
        let link = self
            .links
            .get_by_id(id)
            .await?
            .ok_or(ServiceError::LinkNotFound)?;

        if !link.is_owned_by(requester) {
            return Err(ServiceError::Unauthorized);
        }

        Ok(link)
    }

    /// Replace the expiry of an owned link. `None` removes it.
    pub async fn update_link(
        &self,
        id: i64,
        requester: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Link> {
        self.get_link(id, requester).await?;

        let now = Utc::now();
        if expires_at.is_some_and(|exp| exp < now) {
            return Err(ServiceError::ExpirationInPast);
        }

        self.links
            .update_expiration(id, expires_at, now)
            .await?
            .ok_or(ServiceError::LinkNotFound)
    }

    /// Hard-delete an owned link together with its click history.
    pub async fn delete_link(&self, id: i64, requester: i64) -> Result<()> {
        let link = self.get_link(id, requester).await?;

        if !self.links.delete(id).await? {
            return Err(ServiceError::LinkNotFound);
        }

        tracing::info!(id, code = %link.short_code, "link deleted");
        Ok(())
    }

    /// Resolve `short_code`, append a click event and bump the counter.
    ///
    /// The returned link's `click_count` includes this click.
    pub async fn record_click(&self, short_code: &str, ctx: ClickContext) -> Result<Link> {
        let link = self.get_link_by_short_code(short_code).await?;
        self.record_resolved_click(link, ctx).await
    }

    /// Like [`Self::record_click`] for a link already obtained from
    /// [`Self::get_link_by_short_code`], so callers can enrich the context
    /// only once the code is known to be live.
    pub async fn record_resolved_click(&self, mut link: Link, ctx: ClickContext) -> Result<Link> {
        let (browser, os) = parse_user_agent(ctx.user_agent.as_deref());
        let device = DeviceClass::from_user_agent(ctx.user_agent.as_deref().unwrap_or_default());

        self.clicks
            .record(NewClick {
                link_id: link.id,
                ip_address: ctx.ip_address,
                user_agent: ctx.user_agent,
                referer: ctx.referer,
                browser,
                os,
                device,
                country: ctx.country,
                city: ctx.city,
                clicked_at: Utc::now(),
            })
            .await?;

        link.click_count += 1;
        Ok(link)
    }

    /// Click statistics for an owned link within `[from, to]`.
    pub async fn get_link_stats(
        &self,
        id: i64,
        requester: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<LinkStats> {
        self.get_link(id, requester).await?;
        Ok(self.clicks.stats(id, from, to).await?)
    }

    /// The most recent click events of an owned link, newest first.
    pub async fn recent_clicks(&self, id: i64, requester: i64, limit: u32) -> Result<Vec<ClickEvent>> {
        self.get_link(id, requester).await?;
        let limit = limit.clamp(1, MAX_RECENT_CLICKS);
        Ok(self.clicks.recent(id, limit as i64).await?)
    }

    /// One page of the links `owner` created, newest first. `page` starts at 1.
    pub async fn list_user_links(&self, owner: i64, page: u32, limit: u32) -> Result<Vec<Link>> {
        let page = page.max(1) as i64;
        let limit = limit as i64;
        Ok(self
            .links
            .list_by_user(owner, (page - 1) * limit, limit)
            .await?)
    }

    /// Delete links whose expiry lies before `before`.
    pub async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64> {
        Ok(self.links.delete_expired(before).await?)
    }
}

/// Parse a User-Agent string using woothee and return `(browser, os)`.
fn parse_user_agent(ua: Option<&str>) -> (Option<String>, Option<String>) {
    let ua = match ua {
        Some(s) if !s.is_empty() => s,
        _ => return (None, None),
    };

    let known = |value: &str| {
        if value.is_empty() || value == "UNKNOWN" {
            None
        } else {
            Some(value.to_owned())
        }
    };

    match Parser::new().parse(ua) {
        Some(result) => (known(result.name), known(result.os)),
        None => (None, None),
    }
}
