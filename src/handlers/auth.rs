use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::{error::Result, handlers::users::UserResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: UserResponse,
}

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> Result<(StatusCode, Json<TokenResponse>)> {
    let email = body.email.trim();
    let (user, token) = state.users.register(email, &body.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            token,
            user: user.into(),
        }),
    ))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> Result<Json<TokenResponse>> {
    let (user, token) = state
        .users
        .login(body.email.trim(), &body.password)
        .await
        .inspect_err(|e| {
            if !e.is_internal() {
                tracing::warn!("failed login attempt");
            }
        })?;

    tracing::info!(user_id = user.id, "user logged in");
    Ok(Json(TokenResponse {
        token,
        user: user.into(),
    }))
}
