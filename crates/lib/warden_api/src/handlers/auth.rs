//! Public authentication handlers.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::AppState;
use crate::error::AppResult;
use crate::models::{AuthStatusResponse, LoginRequest, PasswordResetRequest, TokenResponse};
use crate::services::auth;

/// `POST /auth/login`: authenticate with username + password.
pub async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let meta = auth::login_meta(&headers);
    let resp = auth::login(&state, &body.username, &body.password, meta).await?;
    Ok(Json(resp))
}

/// `GET /auth/status`: whether an administrator exists.
pub async fn auth_status_handler(
    State(state): State<AppState>,
) -> AppResult<Json<AuthStatusResponse>> {
    let admin_exists = state.engine.admin_exists().await?;
    Ok(Json(AuthStatusResponse { admin_exists }))
}

/// `POST /auth/password-reset`: redeem a reset token.
pub async fn password_reset_handler(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetRequest>,
) -> AppResult<StatusCode> {
    state
        .accounts
        .redeem_reset_token(&body.token, &body.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
