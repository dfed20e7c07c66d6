//! Persistent store abstraction.
//!
//! All reads and writes go through a [`StoreTx`] opened with
//! [`RoleStore::begin`]. A transaction that is dropped without
//! [`StoreTx::commit`] leaves no trace.
//!
//! Transactions that can lower the number of admin holders must call
//! [`StoreTx::lock_admin_floor`] before they read that number. Backends
//! guarantee that two transactions holding the lock never interleave.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{
    LoginLogEntry, NewUser, ResetTokenRecord, Role, User,
};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to a relational store holding users, roles and their dependents.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    fn backend_name(&self) -> &'static str;
}

/// One open transaction.
#[async_trait]
pub trait StoreTx: Send {
    /// Serialize with every other transaction that may change the admin count.
    async fn lock_admin_floor(&mut self) -> StoreResult<()>;

    // Users

    async fn find_user(&mut self, id: Uuid) -> StoreResult<Option<User>>;
    /// Like [`StoreTx::find_user`], but the row cannot be deleted or locked
    /// by another transaction until this one ends.
    async fn lock_user(&mut self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&mut self, username: &str) -> StoreResult<Option<User>>;
    /// True when any user has this username or this email.
    async fn username_or_email_taken(&mut self, username: &str, email: &str)
    -> StoreResult<bool>;
    /// True when a user other than `except` has this email.
    async fn email_taken_by_other(&mut self, email: &str, except: Uuid) -> StoreResult<bool>;
    async fn insert_user(&mut self, user: NewUser) -> StoreResult<User>;
    /// All users, oldest first.
    async fn list_users(&mut self) -> StoreResult<Vec<User>>;
    async fn password_hash(&mut self, user_id: Uuid) -> StoreResult<Option<String>>;
    async fn set_password_hash(&mut self, user_id: Uuid, hash: &str) -> StoreResult<()>;
    async fn set_email(&mut self, user_id: Uuid, email: &str) -> StoreResult<()>;
    async fn set_last_login(&mut self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
    /// Remove the user's assignments, reset tokens and login history, then the user.
    async fn delete_user_cascade(&mut self, user_id: Uuid) -> StoreResult<()>;

    // Roles and assignments

    async fn find_role(&mut self, name: &str) -> StoreResult<Option<Role>>;
    async fn insert_role(&mut self, role: Role) -> StoreResult<Role>;
    /// All roles, ordered by name.
    async fn list_roles(&mut self) -> StoreResult<Vec<Role>>;
    /// Role names held by a user, ordered by name.
    async fn user_role_names(&mut self, user_id: Uuid) -> StoreResult<Vec<String>>;
    /// Number of distinct users holding the named role.
    async fn count_role_holders(&mut self, role_name: &str) -> StoreResult<i64>;
    /// Add an assignment. Adding an existing pairing changes nothing.
    async fn add_assignment(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()>;
    /// Remove an assignment. Removing a missing pairing changes nothing.
    async fn remove_assignment(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()>;

    // Dependents

    async fn insert_login_log(&mut self, entry: LoginLogEntry) -> StoreResult<()>;
    /// Login history for a user, newest first.
    async fn login_logs_for(&mut self, user_id: Uuid) -> StoreResult<Vec<LoginLogEntry>>;
    async fn insert_reset_token(&mut self, token: ResetTokenRecord) -> StoreResult<()>;
    async fn find_reset_token(&mut self, token_hash: &str)
    -> StoreResult<Option<ResetTokenRecord>>;
    async fn mark_reset_token_used(&mut self, id: Uuid) -> StoreResult<()>;
    async fn reset_tokens_for(&mut self, user_id: Uuid) -> StoreResult<Vec<ResetTokenRecord>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
