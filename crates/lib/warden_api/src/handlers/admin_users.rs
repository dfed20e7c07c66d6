//! User and role administration. Every route here sits behind
//! `require_auth` and `require_admin`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use uuid::Uuid;
use warden_core::ids::parse_id;
use warden_core::rbac::engine::CreateUser;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    AdminResetPasswordRequest, CreateUserRequest, DeletedUserResponse, LoginLogResponse,
    ResetTokenResponse, RoleRequest, RoleResponse, UserResponse, UserRolesResponse,
};

fn user_id(raw: &str) -> AppResult<Uuid> {
    parse_id(raw).ok_or_else(|| AppError::NotFound(format!("user {raw}")))
}

/// `GET /admin/users`
pub async fn list_users_handler(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<UserResponse>>> {
    let users = state.engine.list_users().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// `POST /admin/users`
pub async fn create_user_handler(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let password = body
        .password
        .unwrap_or_else(|| state.config.initial_password.clone());
    let user = state
        .engine
        .create_user(CreateUser::new(body.username, body.email, password))
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// `GET /admin/roles`
pub async fn list_roles_handler(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<RoleResponse>>> {
    let roles = state.engine.list_roles().await?;
    Ok(Json(roles.into_iter().map(RoleResponse::from).collect()))
}

/// `POST /admin/users/{id}/grant`
pub async fn grant_role_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(actor)): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(body): Json<RoleRequest>,
) -> AppResult<Json<UserRolesResponse>> {
    let target = user_id(&id)?;
    let roles = state.engine.grant_role(actor.id, target, &body.role).await?;
    Ok(Json(UserRolesResponse {
        user_id: target,
        roles,
    }))
}

/// `POST /admin/users/{id}/revoke`
pub async fn revoke_role_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(actor)): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(body): Json<RoleRequest>,
) -> AppResult<Json<UserRolesResponse>> {
    let target = user_id(&id)?;
    let roles = state.engine.revoke_role(actor.id, target, &body.role).await?;
    Ok(Json(UserRolesResponse {
        user_id: target,
        roles,
    }))
}

/// `DELETE /admin/users/{id}`
pub async fn delete_user_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(actor)): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> AppResult<Json<DeletedUserResponse>> {
    let target = user_id(&id)?;
    let deleted = state.engine.delete_user(actor.id, target).await?;
    Ok(Json(deleted.into()))
}

/// `POST /admin/users/{id}/reset-password`
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AdminResetPasswordRequest>,
) -> AppResult<StatusCode> {
    let target = user_id(&id)?;
    state.engine.reset_password(target, &body.new_password).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /admin/users/{id}/reset-token`: issue a single-use reset token.
pub async fn reset_token_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<(StatusCode, Json<ResetTokenResponse>)> {
    let target = user_id(&id)?;
    let issued = state
        .accounts
        .issue_reset_token(target, state.config.reset_token_ttl())
        .await?;
    Ok((StatusCode::CREATED, Json(issued.into())))
}

/// `GET /admin/users/{id}/logins`
pub async fn login_history_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<LoginLogResponse>>> {
    let target = user_id(&id)?;
    let entries = state.accounts.login_history(target).await?;
    Ok(Json(entries.into_iter().map(LoginLogResponse::from).collect()))
}
