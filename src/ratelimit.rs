//! Fixed-window request limiter keyed by client IP.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;

use crate::{ip::client_ip, AppState};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

/// Per-client request counters. Each client gets `max_requests` per window;
/// the window starts with the client's first request.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    pub fn check(&self, client: &str) -> Decision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> Decision {
        // The entry guard holds the shard lock, so count updates are serialised per client.
        let mut entry = self.windows.entry(client.to_owned()).or_insert(Window {
            count: 0,
            resets_at: now + self.window,
        });

        if now >= entry.resets_at {
            entry.count = 0;
            entry.resets_at = now + self.window;
        }
        entry.count = entry.count.saturating_add(1);

        Decision {
            allowed: entry.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_in: entry.resets_at.saturating_duration_since(now),
        }
    }

    /// Drop windows that have already ended. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.resets_at > now);
        before - self.windows.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Periodically forget finished windows so idle clients don't pile up.
pub fn spawn_pruner(state: Arc<AppState>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = state.rate_limiter.prune();
            if removed > 0 {
                tracing::debug!(removed, "pruned rate-limit windows");
            }
        }
    })
}

/// axum middleware applying the shared limiter to every request.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    // Requests without a peer address share one bucket.
    let client = client_ip(
        request.headers(),
        connect_info.map(|ConnectInfo(addr)| addr),
        &state.config.trusted_proxies,
    )
    .unwrap_or_else(|| "unknown".to_owned());

    let decision = state.rate_limiter.check(&client);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, "rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Too many requests, try again later",
                "code": "RATE_LIMITED",
            })),
        )
            .into_response()
    };

    set_headers(response.headers_mut(), &decision);
    response
}

fn set_headers(headers: &mut HeaderMap, decision: &Decision) {
    let reset_at = chrono::Utc::now().timestamp() + decision.reset_in.as_secs() as i64;
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        let remaining: Vec<u32> = (0..3)
            .map(|_| {
                let d = limiter.check_at("1.2.3.4", now);
                assert!(d.allowed);
                d.remaining
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check_at("1.2.3.4", now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.limit, 3);
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.check_at("a", start).allowed);
        assert!(!limiter.check_at("a", start + Duration::from_secs(5)).allowed);

        let later = limiter.check_at("a", start + Duration::from_secs(10));
        assert!(later.allowed);
        assert_eq!(later.reset_in, Duration::from_secs(10));
    }

    #[test]
    fn prune_drops_finished_windows() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        let start = Instant::now();
        limiter.check_at("old", start);
        limiter.check_at("new", start + Duration::from_secs(8));
        assert_eq!(limiter.tracked_clients(), 2);

        assert_eq!(limiter.prune_at(start + Duration::from_secs(11)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
