//! Account and role domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! types in `warden_api` (which rename fields to camelCase).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the administrative role guarded by the admin floor.
pub const ADMIN_ROLE: &str = "admin";

/// Name of the role new accounts receive by default.
pub const USER_ROLE: &str = "user";

/// Domain user. The password hash is never part of this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// User together with the names of the roles it currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWithRoles {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<String>,
}

impl UserWithRoles {
    /// Whether the user holds the named role.
    pub fn has_role(&self, name: &str) -> bool {
        has_role(&self.roles, name)
    }
}

/// Fields required to insert a user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Named capability grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// Identity of a removed user, kept for display after deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedUser {
    pub id: Uuid,
    pub username: String,
}

/// The authenticated identity performing an operation.
///
/// A plain value: capability checks go through [`has_role`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
}

/// Capability check over a role-name list.
pub fn has_role(roles: &[String], name: &str) -> bool {
    roles.iter().any(|r| r == name)
}

/// Outcome of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginStatus {
    Success,
    Fail,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStatus::Success => "success",
            LoginStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LoginStatus::Success),
            "fail" => Ok(LoginStatus::Fail),
            other => Err(format!("unknown login status '{other}'")),
        }
    }
}

/// One row of login history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginLogEntry {
    pub id: Uuid,
    /// `None` when the attempted username did not match any account.
    pub user_id: Option<Uuid>,
    pub login_time: DateTime<Utc>,
    pub status: LoginStatus,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Password reset token record. Only the SHA-256 digest of the token is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: user ID (standard JWT `sub` claim).
    pub sub: String,
    pub username: String,
    /// Roles at issue time. Informational; authorization re-reads the store.
    pub roles: Vec<String>,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}
