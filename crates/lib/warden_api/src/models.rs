//! Request and response bodies. All JSON fields are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::auth::accounts::IssuedResetToken;
use warden_core::models::auth::{DeletedUser, LoginLogEntry, LoginStatus, Role, UserWithRoles};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

// -- auth -----------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until `accessToken` expires.
    pub expires_in: i64,
    pub token_type: String,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatusResponse {
    pub admin_exists: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetRequest {
    pub token: String,
    pub new_password: String,
}

// -- users ----------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<UserWithRoles> for UserResponse {
    fn from(u: UserWithRoles) -> Self {
        Self {
            id: u.user.id,
            username: u.user.username,
            email: u.user.email,
            is_active: u.user.is_active,
            roles: u.roles,
            created_at: u.user.created_at,
            last_login_at: u.user.last_login_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProfileRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// -- admin ----------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    /// Falls back to the configured initial password.
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRolesResponse {
    pub user_id: Uuid,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

impl From<Role> for RoleResponse {
    fn from(r: Role) -> Self {
        Self {
            id: r.id,
            name: r.name,
            description: r.description,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedUserResponse {
    pub id: Uuid,
    pub username: String,
}

impl From<DeletedUser> for DeletedUserResponse {
    fn from(d: DeletedUser) -> Self {
        Self {
            id: d.id,
            username: d.username,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminResetPasswordRequest {
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetTokenResponse {
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedResetToken> for ResetTokenResponse {
    fn from(t: IssuedResetToken) -> Self {
        Self {
            user_id: t.user_id,
            token: t.token,
            expires_at: t.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginLogResponse {
    pub id: Uuid,
    pub login_time: DateTime<Utc>,
    pub status: LoginStatus,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl From<LoginLogEntry> for LoginLogResponse {
    fn from(e: LoginLogEntry) -> Self {
        Self {
            id: e.id,
            login_time: e.login_time,
            status: e.status,
            ip: e.ip,
            user_agent: e.user_agent,
        }
    }
}
