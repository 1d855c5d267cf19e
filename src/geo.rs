use dashmap::DashMap;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::AppState;

const IP_API_URL: &str = "http://ip-api.com/json";

/// How long a lookup result (hit or miss) is reused.
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on cached addresses. Once reached, new results are served but
/// not remembered until pruning frees room.
pub const MAX_CACHED: usize = 10_000;

/// Country and city resolved for a visitor address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedLookup {
    info: Option<GeoInfo>,
    cached_at: Instant,
}

/// Resolves visitor IPs to a location through ip-api.com.
///
/// Results are cached per IP for [`CACHE_TTL`], misses included, and the
/// cache never holds more than [`MAX_CACHED`] addresses.
#[derive(Debug)]
pub struct GeoLocator {
    enabled: bool,
    client: reqwest::Client,
    cache: DashMap<String, CachedLookup>,
}

#[derive(Deserialize)]
struct IpApiResponse {
    status: String,
    country: Option<String>,
    city: Option<String>,
}

impl GeoLocator {
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()?;
        Ok(Self {
            enabled,
            client,
            cache: DashMap::new(),
        })
    }

    /// A locator that never performs lookups.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            client: reqwest::Client::new(),
            cache: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `None` when disabled, for private/loopback/unparseable
    /// addresses, and when the API has nothing useful to say.
    pub async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        if !self.enabled || is_private(ip) {
            return None;
        }

        let now = Instant::now();
        if let Some(hit) = self.cached_at(ip, now) {
            return hit;
        }

        let result = self.fetch(ip).await;
        self.remember(ip, result.clone(), now);
        result
    }

    fn cached_at(&self, ip: &str, now: Instant) -> Option<Option<GeoInfo>> {
        let entry = self.cache.get(ip)?;
        if now.saturating_duration_since(entry.cached_at) >= CACHE_TTL {
            return None;
        }
        Some(entry.info.clone())
    }

    fn remember(&self, ip: &str, info: Option<GeoInfo>, now: Instant) {
        if self.cache.len() >= MAX_CACHED && !self.cache.contains_key(ip) {
            self.prune_at(now);
            if self.cache.len() >= MAX_CACHED {
                tracing::debug!("geo cache full, not caching {}", ip);
                return;
            }
        }
        self.cache.insert(ip.to_owned(), CachedLookup { info, cached_at: now });
    }

    /// Forget results older than [`CACHE_TTL`]. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let before = self.cache.len();
        self.cache
            .retain(|_, e| now.saturating_duration_since(e.cached_at) < CACHE_TTL);
        before - self.cache.len()
    }

    pub fn cached_addresses(&self) -> usize {
        self.cache.len()
    }

    async fn fetch(&self, ip: &str) -> Option<GeoInfo> {
        let url = format!("{IP_API_URL}/{ip}?fields=status,country,city");

        let body: IpApiResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| tracing::debug!("geo lookup network error for {}: {}", ip, e))
            .ok()?
            .json()
            .await
            .map_err(|e| tracing::debug!("geo lookup parse error for {}: {}", ip, e))
            .ok()?;

        if body.status != "success" {
            tracing::debug!("geo lookup returned non-success status for {}", ip);
            return None;
        }

        let info = GeoInfo {
            country: body.country.filter(|s| !s.is_empty()),
            city: body.city.filter(|s| !s.is_empty()),
        };

        if info.country.is_none() && info.city.is_none() {
            return None;
        }
        Some(info)
    }
}

/// Periodically drop stale lookups.
pub fn spawn_pruner(state: Arc<AppState>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = state.geo.prune();
            if removed > 0 {
                tracing::debug!(removed, "pruned geo cache");
            }
        }
    })
}

/// Addresses never sent to a public geolocation API: loopback, link-local,
/// private ranges, IPv6 special addresses and anything unparseable.
fn is_private(ip: &str) -> bool {
    // "::ffff:1.2.3.4" → "1.2.3.4"
    let ip = ip.strip_prefix("::ffff:").unwrap_or(ip);

    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => {
            addr.is_loopback()
                || addr.is_link_local()
                || addr.is_unspecified()
                || addr.is_broadcast()
                || addr.is_private()
        }
        Ok(IpAddr::V6(addr)) => {
            let first = addr.segments()[0];
            addr.is_loopback()
                || addr.is_unspecified()
                // fe80::/10 link-local
                || (first & 0xffc0) == 0xfe80
                // fc00::/7 unique-local
                || (first & 0xfe00) == 0xfc00
        }
        Err(_) => true,
    }
}
