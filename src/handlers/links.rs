use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{AuthUser, MaybeAuthUser},
    error::{Result, ServiceError},
    models::{ClickEvent, Link, LinkStats},
    shortcode, AppState,
};

/// Path segments a custom code may not take because the router already owns them.
const RESERVED_CODES: &[&str] = &["api", "health"];

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_STATS_DAYS: i64 = 30;

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub id: i64,
    pub short_code: String,
    pub short_url: String,
    pub original_url: String,
    pub click_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LinkResponse {
    fn new(link: Link, base_url: &str) -> Self {
        Self {
            short_url: format!("{}/{}", base_url, link.short_code),
            id: link.id,
            short_code: link.short_code,
            original_url: link.original_url,
            click_count: link.click_count,
            expires_at: link.expires_at,
            created_at: link.created_at,
            updated_at: link.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub url: String,
    pub custom_code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// `expires_at: null` (or omitted) removes the expiry.
#[derive(Debug, Deserialize)]
pub struct UpdateLinkRequest {
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LinkPage {
    pub page: u32,
    pub limit: u32,
    pub links: Vec<LinkResponse>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ClicksQuery {
    pub limit: Option<u32>,
}

/// POST /api/v1/links
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(user): MaybeAuthUser,
    Json(body): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<LinkResponse>)> {
    let custom_code = body
        .custom_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    if let Some(code) = custom_code {
        if !shortcode::is_valid_custom_code(code)
            || RESERVED_CODES.iter().any(|r| r.eq_ignore_ascii_case(code))
        {
            return Err(ServiceError::InvalidShortCode);
        }
    }

    let link = state
        .links
        .create_link(
            body.url.trim(),
            user.map(|u| u.id),
            custom_code,
            body.expires_at,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(LinkResponse::new(link, &state.config.base_url)),
    ))
}

/// GET /api/v1/links?page=&limit=
pub async fn list_links(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<LinkPage>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let links = state.links.list_user_links(user.id, page, limit).await?;
    let base_url = &state.config.base_url;

    Ok(Json(LinkPage {
        page,
        limit,
        links: links
            .into_iter()
            .map(|l| LinkResponse::new(l, base_url))
            .collect(),
    }))
}

/// GET /api/v1/links/:id
pub async fn get_link(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<LinkResponse>> {
    let link = state.links.get_link(id, user.id).await?;
    Ok(Json(LinkResponse::new(link, &state.config.base_url)))
}

/// PUT /api/v1/links/:id
pub async fn update_link(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateLinkRequest>,
) -> Result<Json<LinkResponse>> {
    let link = state.links.update_link(id, user.id, body.expires_at).await?;
    Ok(Json(LinkResponse::new(link, &state.config.base_url)))
}

/// DELETE /api/v1/links/:id
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.links.delete_link(id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/links/:id/stats?from=&to=
///
/// Both bounds are RFC 3339; the range defaults to the last 30 days.
pub async fn link_stats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<LinkStats>> {
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query
        .from
        .unwrap_or_else(|| to - Duration::days(DEFAULT_STATS_DAYS));

    Ok(Json(state.links.get_link_stats(id, user.id, from, to).await?))
}

/// GET /api/v1/links/:id/clicks?limit=
///
/// Raw click history, newest first.
pub async fn link_clicks(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Query(query): Query<ClicksQuery>,
) -> Result<Json<Vec<ClickEvent>>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(state.links.recent_clicks(id, user.id, limit).await?))
}
