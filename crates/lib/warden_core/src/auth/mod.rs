//! Authentication and self-service account logic.
//!
//! Password hashing, JWT access tokens, login with history, profile changes
//! and password reset tokens. Role mutations live in [`crate::rbac`].

pub mod accounts;
pub mod jwt;
pub mod password;

use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired reset token")]
    InvalidToken,

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AuthError::Conflict(msg),
            StoreError::NotFound(msg) => AuthError::NotFound(msg),
            other => AuthError::Store(other),
        }
    }
}
