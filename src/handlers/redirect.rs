use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::{headers::UserAgent, TypedHeader};

use crate::{error::Result, ip::client_ip, links::ClickContext, AppState};

/// GET /:code
///
/// Resolves the code, records the click (with geolocation when enabled) and
/// answers with a 302 to the original URL. Unknown codes are 404, expired
/// ones 410; neither reaches the geolocation service.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    user_agent: Option<TypedHeader<UserAgent>>,
    headers: HeaderMap,
) -> Result<Response> {
    let link = state.links.get_link_by_short_code(&code).await?;

    let ip = client_ip(
        &headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        &state.config.trusted_proxies,
    );

    let referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned);

    let geo = match ip.as_deref() {
        Some(ip) if state.geo.is_enabled() => state.geo.lookup(ip).await,
        _ => None,
    };
    let (country, city) = geo.map(|g| (g.country, g.city)).unwrap_or_default();

    let link = state
        .links
        .record_resolved_click(
            link,
            ClickContext {
                ip_address: ip,
                user_agent: user_agent.map(|TypedHeader(ua)| ua.as_str().to_owned()),
                referer,
                country,
                city,
            },
        )
        .await?;

    tracing::debug!(code = %code, clicks = link.click_count, "redirecting");
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, link.original_url)],
    )
        .into_response())
}
