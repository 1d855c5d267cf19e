use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A shortened link record from the `links` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    pub user_id: Option<i64>,
    pub click_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Link {
    /// A link is expired once its expiry instant lies strictly in the past.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.user_id == Some(user_id)
    }
}

/// Fields supplied when inserting a link.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub short_code: String,
    pub original_url: String,
    pub user_id: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A single click event from the `link_clicks` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClickEvent {
    pub id: i64,
    pub link_id: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub clicked_at: DateTime<Utc>,
}

/// Click data appended for one visit.
#[derive(Debug, Clone)]
pub struct NewClick {
    pub link_id: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: DeviceClass,
    pub country: Option<String>,
    pub city: Option<String>,
    pub clicked_at: DateTime<Utc>,
}

/// Coarse device bucket used by link statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    /// Classify by case-sensitive substring; "Mobile" wins over "Tablet".
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("Mobile") {
            DeviceClass::Mobile
        } else if user_agent.contains("Tablet") {
            DeviceClass::Tablet
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Mobile => "Mobile",
            DeviceClass::Tablet => "Tablet",
            DeviceClass::Desktop => "Desktop",
        }
    }
}

/// A labelled count inside a top-N breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct NamedCount {
    pub name: String,
    pub count: i64,
}

/// Aggregated analytics for one link over a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub link_id: i64,
    pub total_clicks: i64,
    pub unique_clicks: i64,
    /// Keyed by `YYYY-MM-DD` (UTC).
    pub clicks_by_date: BTreeMap<String, i64>,
    /// Top 10 countries, highest first. Missing country is "Unknown".
    pub clicks_by_country: Vec<NamedCount>,
    pub clicks_by_device: BTreeMap<String, i64>,
    /// Top 5 referers, highest first. Missing referer is "Direct".
    pub top_referers: Vec<NamedCount>,
}

/// A registered account from the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-account link totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub user_id: i64,
    pub total_links: i64,
    pub total_clicks: i64,
    pub active_links: i64,
}
