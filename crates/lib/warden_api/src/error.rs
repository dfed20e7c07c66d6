//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;
use warden_core::auth::AuthError;
use warden_core::rbac::RbacError;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// `code` names the rule that refused the request.
    #[error("Forbidden ({code}): {message}")]
    Forbidden { code: &'static str, message: String },

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    /// Caller lacks the `admin` role.
    pub fn admin_required() -> Self {
        AppError::Forbidden {
            code: "forbidden",
            message: "Administrator role required".into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden { code, message } => (StatusCode::FORBIDDEN, *code, message.as_str()),
            AppError::Internal(detail) => {
                error!(%detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<RbacError> for AppError {
    fn from(e: RbacError) -> Self {
        match e {
            RbacError::Validation(msg) => AppError::Validation(msg),
            RbacError::Conflict(msg) => AppError::Conflict(msg),
            RbacError::NotFound(msg) => AppError::NotFound(msg),
            RbacError::Forbidden(reason) => AppError::Forbidden {
                code: reason.code(),
                message: reason.to_string(),
            },
            RbacError::Store(e) => AppError::Internal(e.to_string()),
            RbacError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => AppError::Unauthorized("Invalid credentials".into()),
            AuthError::InvalidToken => {
                AppError::Unauthorized("Invalid or expired reset token".into())
            }
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::Conflict(msg) => AppError::Conflict(msg),
            AuthError::NotFound(msg) => AppError::NotFound(msg),
            AuthError::TokenError(msg) | AuthError::Internal(msg) => AppError::Internal(msg),
            AuthError::Store(e) => AppError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::rbac::ForbiddenReason;

    #[test]
    fn forbidden_reason_becomes_error_code() {
        let err = AppError::from(RbacError::Forbidden(ForbiddenReason::AdminFloor));
        match &err {
            AppError::Forbidden { code, .. } => assert_eq!(*code, "admin_floor"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (AppError::from(RbacError::Validation("x".into())), StatusCode::BAD_REQUEST),
            (AppError::from(RbacError::Conflict("x".into())), StatusCode::CONFLICT),
            (AppError::from(RbacError::NotFound("x".into())), StatusCode::NOT_FOUND),
            (AppError::from(AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED),
            (AppError::from(AuthError::InvalidToken), StatusCode::UNAUTHORIZED),
            (
                AppError::from(RbacError::Internal("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
