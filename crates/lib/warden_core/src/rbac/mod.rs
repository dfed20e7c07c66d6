//! Role integrity: who holds which role, and the rules that keep at least
//! one administrator in the system.
//!
//! Rules enforced by [`engine::RoleEngine`]:
//! - the number of `admin` holders never drops to zero (admin floor);
//! - an actor never revokes a role from, or deletes, their own account;
//! - deleting a user removes its assignments and dependent records in the
//!   same transaction.

pub mod bootstrap;
pub mod engine;

#[cfg(test)]
mod tests;

use std::fmt;

use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// Integrity rule that blocked an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    SelfRevoke,
    SelfDelete,
    AdminFloor,
}

impl ForbiddenReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ForbiddenReason::SelfRevoke => "self_revoke",
            ForbiddenReason::SelfDelete => "self_delete",
            ForbiddenReason::AdminFloor => "admin_floor",
        }
    }
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ForbiddenReason::SelfRevoke => "cannot revoke roles from your own account",
            ForbiddenReason::SelfDelete => "cannot delete your own account",
            ForbiddenReason::AdminFloor => "at least one administrator must remain",
        };
        f.write_str(msg)
    }
}

/// Role engine errors.
#[derive(Debug, Error)]
pub enum RbacError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(ForbiddenReason),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for RbacError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => RbacError::Conflict(msg),
            StoreError::NotFound(msg) => RbacError::NotFound(msg),
            other => RbacError::Store(other),
        }
    }
}

impl From<AuthError> for RbacError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(msg) => RbacError::Validation(msg),
            AuthError::Conflict(msg) => RbacError::Conflict(msg),
            AuthError::NotFound(msg) => RbacError::NotFound(msg),
            AuthError::Store(e) => RbacError::Store(e),
            other => RbacError::Internal(other.to_string()),
        }
    }
}

pub type RbacResult<T> = Result<T, RbacError>;
