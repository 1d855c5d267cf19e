//! URL shortener: short-code links with click analytics and user accounts,
//! served as a JSON API over axum with SQLite storage.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod ip;
pub mod links;
pub mod models;
pub mod ratelimit;
pub mod repository;
pub mod shortcode;
pub mod sweep;
pub mod users;
pub mod validate;

use std::{sync::Arc, time::Duration};

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::TokenIssuer, config::AppConfig, db::SqliteStore, geo::GeoLocator, links::LinkService,
    ratelimit::RateLimiter, users::UserService,
};

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub links: LinkService,
    pub users: UserService,
    pub tokens: TokenIssuer,
    pub config: AppConfig,
    pub rate_limiter: RateLimiter,
    /// IP → location lookups with a bounded, expiring cache.
    pub geo: GeoLocator,
}

impl AppState {
    /// Wire services over a single SQLite store.
    pub fn new(store: SqliteStore, config: AppConfig, geo: GeoLocator) -> Self {
        let store = Arc::new(store);
        let tokens = TokenIssuer::new(&config.jwt_secret, config.jwt_expire_hours);

        let links = LinkService::new(store.clone(), store.clone(), config.short_code_length);
        let users = UserService::new(store, tokens.clone());
        let rate_limiter = RateLimiter::new(
            config.rate_limit_requests,
            Duration::from_secs(config.rate_limit_window_secs),
        );

        Self {
            links,
            users,
            tokens,
            config,
            rate_limiter,
            geo,
        }
    }
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route(
            "/users/me",
            get(handlers::users::me)
                .put(handlers::users::update_me)
                .delete(handlers::users::delete_me),
        )
        .route("/users/me/password", put(handlers::users::change_password))
        .route("/users/me/stats", get(handlers::users::stats))
        .route(
            "/links",
            post(handlers::links::create_link).get(handlers::links::list_links),
        )
        .route(
            "/links/:id",
            get(handlers::links::get_link)
                .put(handlers::links::update_link)
                .delete(handlers::links::delete_link),
        )
        .route("/links/:id/stats", get(handlers::links::link_stats))
        .route("/links/:id/clicks", get(handlers::links::link_clicks));

    let cors = cors_layer(&state.config.cors_allow_origins);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        // Short-link redirect; static routes above take priority
        .route("/:code", get(handlers::redirect::redirect))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ratelimit::rate_limit,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}
