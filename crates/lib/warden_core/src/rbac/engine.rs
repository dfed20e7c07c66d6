//! The role integrity engine.
//!
//! Sole writer of user↔role assignments. Every operation runs in one store
//! transaction: validate, mutate, commit. An error anywhere drops the
//! transaction, so callers never observe partial changes.
//!
//! Callers are expected to have checked that the actor holds `admin`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ForbiddenReason, RbacError, RbacResult};
use crate::auth::password::PasswordHasher;
use crate::ids::new_id;
use crate::models::auth::{
    ADMIN_ROLE, DeletedUser, NewUser, Role, USER_ROLE, User, UserWithRoles, has_role,
};
use crate::store::{RoleStore, StoreTx};

/// Longest username the schema accepts.
pub const MAX_USERNAME_LEN: usize = 32;

/// Longest email the schema accepts.
pub const MAX_EMAIL_LEN: usize = 255;

/// Input for [`RoleEngine::create_user`].
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Role attached on creation when it exists. Defaults to `user`.
    pub default_role: String,
}

impl CreateUser {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            default_role: USER_ROLE.to_string(),
        }
    }

    pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = role.into();
        self
    }
}

pub(super) fn required<'a>(value: &'a str, field: &str, max: usize) -> RbacResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RbacError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(RbacError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value)
}

async fn load_user(tx: &mut dyn StoreTx, user_id: Uuid) -> RbacResult<User> {
    tx.find_user(user_id)
        .await?
        .ok_or_else(|| RbacError::NotFound(format!("user {user_id}")))
}

/// Load a user and hold it against concurrent deletion until commit.
async fn lock_target(tx: &mut dyn StoreTx, user_id: Uuid) -> RbacResult<User> {
    tx.lock_user(user_id)
        .await?
        .ok_or_else(|| RbacError::NotFound(format!("user {user_id}")))
}

async fn load_role(tx: &mut dyn StoreTx, name: &str) -> RbacResult<Role> {
    tx.find_role(name)
        .await?
        .ok_or_else(|| RbacError::NotFound(format!("role '{name}'")))
}

/// Fail with `AdminFloor` when removing admin from `roles` would leave no admin.
///
/// Must run after `lock_admin_floor` in the same transaction.
async fn check_admin_floor(tx: &mut dyn StoreTx, roles: &[String]) -> RbacResult<()> {
    if has_role(roles, ADMIN_ROLE) && tx.count_role_holders(ADMIN_ROLE).await? <= 1 {
        return Err(RbacError::Forbidden(ForbiddenReason::AdminFloor));
    }
    Ok(())
}

/// Mutations and reads over users and their roles.
#[derive(Clone)]
pub struct RoleEngine {
    store: Arc<dyn RoleStore>,
    hasher: Arc<dyn PasswordHasher>,
}

impl RoleEngine {
    pub fn new(store: Arc<dyn RoleStore>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { store, hasher }
    }

    /// Create an account and attach its default role if that role exists.
    ///
    /// A taken username and a taken email produce the same `Conflict`.
    pub async fn create_user(&self, req: CreateUser) -> RbacResult<UserWithRoles> {
        let username = required(&req.username, "Username", MAX_USERNAME_LEN)?;
        let email = required(&req.email, "Email", MAX_EMAIL_LEN)?;
        let password = req.password.trim();
        if password.is_empty() {
            return Err(RbacError::Validation("Password is required".into()));
        }
        let password_hash = self.hasher.hash(password)?;

        let mut tx = self.store.begin().await?;
        if tx.username_or_email_taken(username, email).await? {
            return Err(RbacError::Conflict("username or email already exists".into()));
        }
        let user = tx
            .insert_user(NewUser {
                id: new_id(),
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
                created_at: Utc::now(),
            })
            .await?;
        if let Some(role) = tx.find_role(req.default_role.trim()).await? {
            tx.add_assignment(user.id, role.id).await?;
        }
        let roles = tx.user_role_names(user.id).await?;
        tx.commit().await?;

        info!(user_id = %user.id, username = %user.username, ?roles, "user created");
        Ok(UserWithRoles { user, roles })
    }

    /// Give a user a role. Granting a held role succeeds without change.
    pub async fn grant_role(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        role_name: &str,
    ) -> RbacResult<Vec<String>> {
        let mut tx = self.store.begin().await?;
        let target = lock_target(tx.as_mut(), target_id).await?;
        let role = load_role(tx.as_mut(), role_name.trim()).await?;

        tx.add_assignment(target.id, role.id).await?;
        let roles = tx.user_role_names(target.id).await?;
        tx.commit().await?;

        info!(%actor_id, %target_id, role = %role.name, "role granted");
        Ok(roles)
    }

    /// Take a role away from a user.
    ///
    /// Checked in order: target and role exist, target is not the actor,
    /// the admin floor holds. Revoking an unheld role succeeds without change.
    pub async fn revoke_role(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        role_name: &str,
    ) -> RbacResult<Vec<String>> {
        let mut tx = self.store.begin().await?;
        tx.lock_admin_floor().await?;

        let target = lock_target(tx.as_mut(), target_id).await?;
        let role = load_role(tx.as_mut(), role_name.trim()).await?;

        if target.id == actor_id {
            warn!(%actor_id, role = %role.name, "self revoke rejected");
            return Err(RbacError::Forbidden(ForbiddenReason::SelfRevoke));
        }

        let held = tx.user_role_names(target.id).await?;
        if role.name == ADMIN_ROLE
            && let Err(e) = check_admin_floor(tx.as_mut(), &held).await
        {
            warn!(%actor_id, %target_id, "admin revoke rejected by admin floor");
            return Err(e);
        }

        tx.remove_assignment(target.id, role.id).await?;
        let roles = tx.user_role_names(target.id).await?;
        tx.commit().await?;

        info!(%actor_id, %target_id, role = %role.name, "role revoked");
        Ok(roles)
    }

    /// Delete a user together with its assignments, reset tokens and
    /// login history.
    ///
    /// Checked in order: target exists, target is not the actor, the admin
    /// floor holds.
    pub async fn delete_user(&self, actor_id: Uuid, target_id: Uuid) -> RbacResult<DeletedUser> {
        let mut tx = self.store.begin().await?;
        tx.lock_admin_floor().await?;

        let target = lock_target(tx.as_mut(), target_id).await?;
        if target.id == actor_id {
            warn!(%actor_id, "self delete rejected");
            return Err(RbacError::Forbidden(ForbiddenReason::SelfDelete));
        }

        let held = tx.user_role_names(target.id).await?;
        if let Err(e) = check_admin_floor(tx.as_mut(), &held).await {
            warn!(%actor_id, %target_id, "user delete rejected by admin floor");
            return Err(e);
        }

        tx.delete_user_cascade(target.id).await?;
        tx.commit().await?;

        info!(%actor_id, %target_id, username = %target.username, "user deleted");
        Ok(DeletedUser {
            id: target.id,
            username: target.username,
        })
    }

    /// Replace a user's password without knowing the old one.
    pub async fn reset_password(&self, target_id: Uuid, new_password: &str) -> RbacResult<User> {
        let mut tx = self.store.begin().await?;
        let target = lock_target(tx.as_mut(), target_id).await?;

        let new_password = new_password.trim();
        if new_password.is_empty() {
            return Err(RbacError::Validation("New password must not be empty".into()));
        }
        let hash = self.hasher.hash(new_password)?;
        tx.set_password_hash(target.id, &hash).await?;
        tx.commit().await?;

        info!(%target_id, "password reset by administrator");
        Ok(target)
    }

    /// All users with their roles, oldest first.
    pub async fn list_users(&self) -> RbacResult<Vec<UserWithRoles>> {
        let mut tx = self.store.begin().await?;
        let users = tx.list_users().await?;
        let mut out = Vec::with_capacity(users.len());
        for user in users {
            let roles = tx.user_role_names(user.id).await?;
            out.push(UserWithRoles { user, roles });
        }
        Ok(out)
    }

    pub async fn get_user(&self, user_id: Uuid) -> RbacResult<UserWithRoles> {
        let mut tx = self.store.begin().await?;
        let user = load_user(tx.as_mut(), user_id).await?;
        let roles = tx.user_role_names(user.id).await?;
        Ok(UserWithRoles { user, roles })
    }

    /// Current role names of a user.
    pub async fn user_roles(&self, user_id: Uuid) -> RbacResult<Vec<String>> {
        Ok(self.get_user(user_id).await?.roles)
    }

    /// All roles, ordered by name.
    pub async fn list_roles(&self) -> RbacResult<Vec<Role>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_roles().await?)
    }

    /// Number of users holding `admin`.
    pub async fn admin_count(&self) -> RbacResult<i64> {
        let mut tx = self.store.begin().await?;
        Ok(tx.count_role_holders(ADMIN_ROLE).await?)
    }

    /// Whether anyone holds `admin` (first-run detection).
    pub async fn admin_exists(&self) -> RbacResult<bool> {
        Ok(self.admin_count().await? > 0)
    }
}
