//! The caller's own account.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{ChangePasswordRequest, UpdateProfileRequest, UserResponse};

/// `GET /me`
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(caller)): Extension<AuthenticatedUser>,
) -> AppResult<Json<UserResponse>> {
    let user = state.engine.get_user(caller.id).await?;
    Ok(Json(user.into()))
}

/// `PATCH /me`: change email.
pub async fn update_me_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(caller)): Extension<AuthenticatedUser>,
    Json(body): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = state.accounts.update_email(caller.id, &body.email).await?;
    Ok(Json(user.into()))
}

/// `POST /me/password`
pub async fn change_password_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(caller)): Extension<AuthenticatedUser>,
    Json(body): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    state
        .accounts
        .change_password(caller.id, &body.current_password, &body.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
