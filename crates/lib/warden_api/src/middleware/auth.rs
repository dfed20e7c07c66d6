//! Authentication middleware: bearer token verification and the admin gate.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;
use warden_core::auth::jwt::verify_access_token;
use warden_core::ids::parse_id;
use warden_core::models::auth::{ADMIN_ROLE, Principal, has_role};
use warden_core::rbac::RbacError;

use crate::AppState;
use crate::error::AppError;

/// The caller, stored in request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

/// Extracts `Authorization: Bearer <token>`, verifies the JWT and injects
/// [`AuthenticatedUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?;

    let claims = verify_access_token(token, state.config.jwt_secret.as_bytes())
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;
    let id = parse_id(&claims.sub)
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;

    request.extensions_mut().insert(AuthenticatedUser(Principal {
        id,
        username: claims.username,
        roles: claims.roles,
    }));

    Ok(next.run(request).await)
}

/// Lets the request through only if the caller holds `admin` right now.
///
/// Roles are read from the store, not the token, so a revoked administrator
/// is refused immediately. Must run after [`require_auth`].
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let caller = request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))?;

    let roles = match state.engine.user_roles(caller.0.id).await {
        Ok(roles) => roles,
        Err(RbacError::NotFound(_)) => {
            return Err(AppError::Unauthorized("Account no longer exists".into()));
        }
        Err(e) => return Err(e.into()),
    };
    if !has_role(&roles, ADMIN_ROLE) {
        warn!(user_id = %caller.0.id, "admin route refused");
        return Err(AppError::admin_required());
    }

    request.extensions_mut().insert(AuthenticatedUser(Principal {
        roles,
        ..caller.0
    }));
    Ok(next.run(request).await)
}
