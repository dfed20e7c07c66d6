//! Self-service and credential flows around user accounts.
//!
//! Login (with login history), own-profile changes and password reset
//! tokens. None of these touch role assignments.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use super::AuthError;
use super::password::PasswordHasher;
use crate::ids::new_id;
use crate::models::auth::{LoginLogEntry, LoginStatus, ResetTokenRecord, UserWithRoles};
use crate::rbac::engine::MAX_EMAIL_LEN;
use crate::store::RoleStore;

const MAX_IP_LEN: usize = 45;
const MAX_USER_AGENT_LEN: usize = 255;
const RESET_TOKEN_LEN: usize = 64;

/// Request metadata recorded with each login attempt.
#[derive(Debug, Clone, Default)]
pub struct LoginMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// A freshly issued reset token. `token` is the only copy of the plaintext.
#[derive(Debug, Clone)]
pub struct IssuedResetToken {
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

fn generate_reset_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a reset token, as stored.
pub fn hash_reset_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn truncate(value: Option<String>, max: usize) -> Option<String> {
    value.map(|v| v.chars().take(max).collect())
}

fn non_empty_password(raw: &str) -> Result<(), AuthError> {
    if raw.trim().is_empty() {
        return Err(AuthError::Validation("New password must not be empty".into()));
    }
    Ok(())
}

/// Account operations over a store and a password hasher.
#[derive(Clone)]
pub struct Accounts {
    store: Arc<dyn RoleStore>,
    hasher: Arc<dyn PasswordHasher>,
}

impl Accounts {
    pub fn new(store: Arc<dyn RoleStore>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { store, hasher }
    }

    /// Check a username/password pair and record the attempt.
    ///
    /// Unknown users, inactive users and wrong passwords all yield
    /// `InvalidCredentials`. A login-log row is written in every case.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        meta: LoginMeta,
    ) -> Result<UserWithRoles, AuthError> {
        let username = username.trim();
        let mut tx = self.store.begin().await?;

        let user = tx.find_user_by_username(username).await?;
        let mut ok = false;
        if let Some(user) = &user
            && user.is_active
            && let Some(hash) = tx.password_hash(user.id).await?
        {
            ok = self.hasher.verify(password, &hash)?;
        }

        let now = Utc::now();
        tx.insert_login_log(LoginLogEntry {
            id: new_id(),
            user_id: user.as_ref().map(|u| u.id),
            login_time: now,
            status: if ok {
                LoginStatus::Success
            } else {
                LoginStatus::Fail
            },
            ip: truncate(meta.ip, MAX_IP_LEN),
            user_agent: truncate(meta.user_agent, MAX_USER_AGENT_LEN),
        })
        .await?;

        let user = match user {
            Some(mut user) if ok => {
                tx.set_last_login(user.id, now).await?;
                user.last_login_at = Some(now);
                user
            }
            _ => {
                tx.commit().await?;
                warn!(username, "login failed");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let roles = tx.user_role_names(user.id).await?;
        tx.commit().await?;
        info!(username, "login succeeded");
        Ok(UserWithRoles { user, roles })
    }

    /// Change the caller's own password. Requires the current password.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        non_empty_password(new_password)?;
        let new_hash = self.hasher.hash(new_password)?;

        let mut tx = self.store.begin().await?;
        let hash = tx
            .password_hash(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {user_id}")))?;
        if !self.hasher.verify(old_password, &hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        tx.set_password_hash(user_id, &new_hash).await?;
        tx.commit().await?;
        info!(%user_id, "password changed");
        Ok(())
    }

    /// Change the caller's own email address.
    pub async fn update_email(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<UserWithRoles, AuthError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AuthError::Validation("Email is required".into()));
        }
        if email.chars().count() > MAX_EMAIL_LEN {
            return Err(AuthError::Validation(format!(
                "Email must be at most {MAX_EMAIL_LEN} characters"
            )));
        }

        let mut tx = self.store.begin().await?;
        let mut user = tx
            .find_user(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {user_id}")))?;
        if tx.email_taken_by_other(email, user_id).await? {
            return Err(AuthError::Conflict("email already exists".into()));
        }
        tx.set_email(user_id, email).await?;
        let roles = tx.user_role_names(user_id).await?;
        tx.commit().await?;

        user.email = email.to_string();
        Ok(UserWithRoles { user, roles })
    }

    /// Issue a single-use password reset token for a user.
    pub async fn issue_reset_token(
        &self,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<IssuedResetToken, AuthError> {
        let token = generate_reset_token();
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::Validation("reset token lifetime out of range".into()))?;

        let mut tx = self.store.begin().await?;
        if tx.find_user(user_id).await?.is_none() {
            return Err(AuthError::NotFound(format!("user {user_id}")));
        }
        tx.insert_reset_token(ResetTokenRecord {
            id: new_id(),
            user_id,
            token_hash: hash_reset_token(&token),
            expires_at,
            used: false,
            created_at: now,
        })
        .await?;
        tx.commit().await?;

        info!(%user_id, %expires_at, "reset token issued");
        Ok(IssuedResetToken {
            user_id,
            token,
            expires_at,
        })
    }

    /// Redeem a reset token: replace the password and burn the token.
    pub async fn redeem_reset_token(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<Uuid, AuthError> {
        non_empty_password(new_password)?;
        let new_hash = self.hasher.hash(new_password.trim())?;

        let mut tx = self.store.begin().await?;
        let record = tx
            .find_reset_token(&hash_reset_token(token.trim()))
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if record.used || record.expires_at <= Utc::now() {
            return Err(AuthError::InvalidToken);
        }
        tx.set_password_hash(record.user_id, &new_hash).await?;
        tx.mark_reset_token_used(record.id).await?;
        tx.commit().await?;

        info!(user_id = %record.user_id, "password reset via token");
        Ok(record.user_id)
    }

    /// Login history of a user, newest first.
    pub async fn login_history(&self, user_id: Uuid) -> Result<Vec<LoginLogEntry>, AuthError> {
        let mut tx = self.store.begin().await?;
        if tx.find_user(user_id).await?.is_none() {
            return Err(AuthError::NotFound(format!("user {user_id}")));
        }
        Ok(tx.login_logs_for(user_id).await?)
    }
}
