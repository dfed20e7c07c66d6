//! In-memory implementation of the role store.
//!
//! Used for tests and for running the server without Postgres. State lives
//! behind one `tokio::sync::Mutex`; a transaction owns that mutex for its
//! whole lifetime and mutates a private copy that replaces the shared state
//! on commit. Transactions are therefore fully serial, which also makes
//! [`StoreTx::lock_admin_floor`] a no-op here.
//!
//! Not durable: everything is lost when the process exits.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{RoleStore, StoreError, StoreResult, StoreTx};
use crate::models::auth::{LoginLogEntry, NewUser, ResetTokenRecord, Role, User};

#[derive(Debug, Clone)]
struct UserRow {
    user: User,
    password_hash: String,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<Uuid, UserRow>,
    roles: BTreeMap<Uuid, Role>,
    /// (user_id, role_id)
    assignments: BTreeSet<(Uuid, Uuid)>,
    reset_tokens: Vec<ResetTokenRecord>,
    login_logs: Vec<LoginLogEntry>,
}

/// Role store backed by process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

impl MemoryTx {
    fn user_row_mut(&mut self, user_id: Uuid) -> StoreResult<&mut UserRow> {
        self.work
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_admin_floor(&mut self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.work.users.get(&id).map(|row| row.user.clone()))
    }

    async fn lock_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        // The store-wide guard already excludes other transactions.
        self.find_user(id).await
    }

    async fn find_user_by_username(&mut self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .work
            .users
            .values()
            .find(|row| row.user.username == username)
            .map(|row| row.user.clone()))
    }

    async fn username_or_email_taken(
        &mut self,
        username: &str,
        email: &str,
    ) -> StoreResult<bool> {
        Ok(self
            .work
            .users
            .values()
            .any(|row| row.user.username == username || row.user.email == email))
    }

    async fn email_taken_by_other(&mut self, email: &str, except: Uuid) -> StoreResult<bool> {
        Ok(self
            .work
            .users
            .values()
            .any(|row| row.user.id != except && row.user.email == email))
    }

    async fn insert_user(&mut self, user: NewUser) -> StoreResult<User> {
        if self.username_or_email_taken(&user.username, &user.email).await? {
            return Err(StoreError::Conflict(
                "username or email already exists".into(),
            ));
        }
        let row = UserRow {
            user: User {
                id: user.id,
                username: user.username,
                email: user.email,
                is_active: true,
                created_at: user.created_at,
                last_login_at: None,
            },
            password_hash: user.password_hash,
        };
        let created = row.user.clone();
        self.work.users.insert(created.id, row);
        Ok(created)
    }

    async fn list_users(&mut self) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self.work.users.values().map(|r| r.user.clone()).collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn password_hash(&mut self, user_id: Uuid) -> StoreResult<Option<String>> {
        Ok(self
            .work
            .users
            .get(&user_id)
            .map(|row| row.password_hash.clone()))
    }

    async fn set_password_hash(&mut self, user_id: Uuid, hash: &str) -> StoreResult<()> {
        self.user_row_mut(user_id)?.password_hash = hash.to_string();
        Ok(())
    }

    async fn set_email(&mut self, user_id: Uuid, email: &str) -> StoreResult<()> {
        if self.email_taken_by_other(email, user_id).await? {
            return Err(StoreError::Conflict("email already exists".into()));
        }
        self.user_row_mut(user_id)?.user.email = email.to_string();
        Ok(())
    }

    async fn set_last_login(&mut self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.user_row_mut(user_id)?.user.last_login_at = Some(at);
        Ok(())
    }

    async fn delete_user_cascade(&mut self, user_id: Uuid) -> StoreResult<()> {
        if !self.work.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        self.work.assignments.retain(|(uid, _)| *uid != user_id);
        self.work.reset_tokens.retain(|t| t.user_id != user_id);
        self.work.login_logs.retain(|l| l.user_id != Some(user_id));
        self.work.users.remove(&user_id);
        Ok(())
    }

    async fn find_role(&mut self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self.work.roles.values().find(|r| r.name == name).cloned())
    }

    async fn insert_role(&mut self, role: Role) -> StoreResult<Role> {
        if self.work.roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::Conflict(format!(
                "role '{}' already exists",
                role.name
            )));
        }
        self.work.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn list_roles(&mut self) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.work.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn user_role_names(&mut self, user_id: Uuid) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .work
            .assignments
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .filter_map(|(_, rid)| self.work.roles.get(rid).map(|r| r.name.clone()))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn count_role_holders(&mut self, role_name: &str) -> StoreResult<i64> {
        let Some(role) = self.find_role(role_name).await? else {
            return Ok(0);
        };
        let count = self
            .work
            .assignments
            .iter()
            .filter(|(_, rid)| *rid == role.id)
            .count();
        Ok(count as i64)
    }

    async fn add_assignment(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        if !self.work.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        if !self.work.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        self.work.assignments.insert((user_id, role_id));
        Ok(())
    }

    async fn remove_assignment(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        self.work.assignments.remove(&(user_id, role_id));
        Ok(())
    }

    async fn insert_login_log(&mut self, entry: LoginLogEntry) -> StoreResult<()> {
        if let Some(user_id) = entry.user_id
            && !self.work.users.contains_key(&user_id)
        {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        self.work.login_logs.push(entry);
        Ok(())
    }

    async fn login_logs_for(&mut self, user_id: Uuid) -> StoreResult<Vec<LoginLogEntry>> {
        let mut logs: Vec<LoginLogEntry> = self
            .work
            .login_logs
            .iter()
            .filter(|l| l.user_id == Some(user_id))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.login_time.cmp(&a.login_time).then(b.id.cmp(&a.id)));
        Ok(logs)
    }

    async fn insert_reset_token(&mut self, token: ResetTokenRecord) -> StoreResult<()> {
        if !self.work.users.contains_key(&token.user_id) {
            return Err(StoreError::NotFound(format!("user {}", token.user_id)));
        }
        if self
            .work
            .reset_tokens
            .iter()
            .any(|t| t.token_hash == token.token_hash)
        {
            return Err(StoreError::Conflict("reset token already exists".into()));
        }
        self.work.reset_tokens.push(token);
        Ok(())
    }

    async fn find_reset_token(
        &mut self,
        token_hash: &str,
    ) -> StoreResult<Option<ResetTokenRecord>> {
        Ok(self
            .work
            .reset_tokens
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn mark_reset_token_used(&mut self, id: Uuid) -> StoreResult<()> {
        let token = self
            .work
            .reset_tokens
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("reset token {id}")))?;
        token.used = true;
        Ok(())
    }

    async fn reset_tokens_for(&mut self, user_id: Uuid) -> StoreResult<Vec<ResetTokenRecord>> {
        Ok(self
            .work
            .reset_tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
