use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shortener::{
    build_router,
    config::{AppConfig, LogFormat},
    db::SqliteStore,
    geo::{self, GeoLocator},
    ratelimit, sweep, AppState,
};

const MAX_DB_CONNECTIONS: u32 = 10;
const GEO_PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be populated.
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("loading configuration")?;
    init_tracing(config.log_format);

    tracing::info!("Starting shortener on {}:{}", config.host, config.port);
    tracing::info!("Base URL: {}", config.base_url);
    tracing::debug!(?config, "configuration loaded");

    let store = SqliteStore::connect(&config.database_url, MAX_DB_CONNECTIONS)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;

    let geo = GeoLocator::new(config.geo_lookup).context("building geolocation client")?;
    if geo.is_enabled() {
        tracing::info!("Click geolocation enabled");
    }

    let bind_addr = format!("{}:{}", config.host, config.port);
    let sweep_every = config.expired_sweep_interval_secs;
    let retention = chrono::Duration::hours(config.expired_retention_hours as i64);
    let prune_every = Duration::from_secs(config.rate_limit_window_secs.max(1));

    let state = Arc::new(AppState::new(store, config, geo));

    ratelimit::spawn_pruner(state.clone(), prune_every);
    if state.geo.is_enabled() {
        geo::spawn_pruner(state.clone(), GEO_PRUNE_INTERVAL);
    }
    if sweep_every > 0 {
        tracing::info!(every_secs = sweep_every, "Expired link sweep enabled");
        sweep::spawn_sweep(state.clone(), Duration::from_secs(sweep_every), retention);
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shortener=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
