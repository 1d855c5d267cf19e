#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use shortener::{
    auth::TokenIssuer, build_router, config::AppConfig, db::SqliteStore, geo::GeoLocator,
    links::LinkService, users::UserService, AppState,
};

pub const CODE_LENGTH: usize = 6;

pub fn test_config(overrides: &[(&str, &str)]) -> AppConfig {
    let mut vars: HashMap<String, String> = [
        ("JWT_SECRET", "integration-test-secret"),
        ("BASE_URL", "http://sho.rt"),
        ("RATE_LIMIT_REQUESTS", "10000"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();
    for (k, v) in overrides {
        vars.insert((*k).to_owned(), (*v).to_owned());
    }
    AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub async fn store() -> SqliteStore {
    SqliteStore::in_memory().await.unwrap()
}

pub struct Services {
    pub store: Arc<SqliteStore>,
    pub links: LinkService,
    pub users: UserService,
}

pub async fn services() -> Services {
    let store = Arc::new(store().await);
    let links = LinkService::new(store.clone(), store.clone(), CODE_LENGTH);
    let users = UserService::new(store.clone(), TokenIssuer::new("integration-test-secret", 1));
    Services {
        store,
        links,
        users,
    }
}

pub async fn app_with(overrides: &[(&str, &str)]) -> (Router, Arc<AppState>) {
    app_with_geo(overrides, GeoLocator::disabled()).await
}

pub async fn app_with_geo(overrides: &[(&str, &str)], geo: GeoLocator) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(store().await, test_config(overrides), geo));
    (build_router(state.clone()), state)
}

pub async fn app() -> (Router, Arc<AppState>) {
    app_with(&[]).await
}

/// Router plus a handle on the same database for out-of-band changes.
pub async fn app_and_store() -> (Router, SqliteStore) {
    let store = store().await;
    let state = Arc::new(AppState::new(
        store.clone(),
        test_config(&[]),
        GeoLocator::disabled(),
    ));
    (build_router(state), store)
}

/// Send one request through the router and return status plus JSON body
/// (`Value::Null` when the body is empty or not JSON).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request(method, uri, token, body)).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Attach the TCP peer address the server would see.
pub fn from_peer(mut req: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

/// Register an account over HTTP and return its token.
pub async fn register(app: &Router, email: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/auth/register",
        None,
        Some(serde_json::json!({ "email": email, "password": "abcdefg1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["token"].as_str().unwrap().to_owned()
}
