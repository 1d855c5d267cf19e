use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::Result,
    models::{User, UserStats},
    AppState,
};

/// Public view of an account; never carries the password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    pub password: String,
}

/// GET /api/v1/users/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<UserResponse>> {
    let user = state.users.profile(user.id).await?;
    Ok(Json(user.into()))
}

/// PUT /api/v1/users/me
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>> {
    let email = body.email.as_deref().map(str::trim);
    let user = state.users.update_profile(user.id, email).await?;
    Ok(Json(user.into()))
}

/// PUT /api/v1/users/me/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<StatusCode> {
    state
        .users
        .change_password(user.id, &body.old_password, &body.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/users/me/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<UserStats>> {
    Ok(Json(state.users.stats(user.id).await?))
}

/// DELETE /api/v1/users/me
pub async fn delete_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<DeleteAccountRequest>,
) -> Result<StatusCode> {
    state.users.delete_account(user.id, &body.password).await?;
    Ok(StatusCode::NO_CONTENT)
}
