//! Background purge of links whose expiry passed long enough ago.

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::AppState;

/// Every `every`, delete links that expired more than `retention` ago.
pub fn spawn_sweep(
    state: Arc<AppState>,
    every: Duration,
    retention: chrono::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - retention;
            match state.links.purge_expired(cutoff).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, %cutoff, "purged expired links"),
                Err(e) => tracing::warn!("expired link sweep failed: {}", e),
            }
        }
    })
}
