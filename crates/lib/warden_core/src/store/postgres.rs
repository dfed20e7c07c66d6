//! PostgreSQL implementation of the role store.
//!
//! Transactions run at READ COMMITTED. The admin-floor lock is a row lock on
//! the `admin` role (`SELECT ... FOR NO KEY UPDATE`): revoke, delete and seed
//! transactions queue on it, and each statement they run after acquiring it
//! sees everything the previous holder committed.
//!
//! Mutations on one user also lock its row (`lock_user`), so a grant that
//! races a delete of the same user waits and then finds it gone. The
//! admin-floor lock is weaker than `FOR UPDATE` so that inserts referencing
//! the `admin` role, which take `FOR KEY SHARE`, never wait on it while
//! holding a user row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{RoleStore, StoreError, StoreResult, StoreTx};
use crate::models::auth::{
    ADMIN_ROLE, LoginLogEntry, LoginStatus, NewUser, ResetTokenRecord, Role, User,
};

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

type UserRow = (Uuid, String, String, bool, DateTime<Utc>, Option<DateTime<Utc>>);

const USER_COLUMNS: &str = "id, username, email, is_active, created_at, last_login_at";

fn user_from_row(
    (id, username, email, is_active, created_at, last_login_at): UserRow,
) -> User {
    User {
        id,
        username,
        email,
        is_active,
        created_at,
        last_login_at,
    }
}

type LoginLogRow = (
    Uuid,
    Option<Uuid>,
    DateTime<Utc>,
    String,
    Option<String>,
    Option<String>,
);

fn login_log_from_row(
    (id, user_id, login_time, status, ip, user_agent): LoginLogRow,
) -> StoreResult<LoginLogEntry> {
    let status = status
        .parse::<LoginStatus>()
        .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;
    Ok(LoginLogEntry {
        id,
        user_id,
        login_time,
        status,
        ip,
        user_agent,
    })
}

type ResetTokenRow = (Uuid, Uuid, String, DateTime<Utc>, bool, DateTime<Utc>);

fn reset_token_from_row(
    (id, user_id, token_hash, expires_at, used, created_at): ResetTokenRow,
) -> ResetTokenRecord {
    ResetTokenRecord {
        id,
        user_id,
        token_hash,
        expires_at,
        used,
        created_at,
    }
}

/// Map unique-constraint violations to `Conflict` and foreign-key
/// violations (the referenced user or role is gone) to `NotFound`.
fn conflict_or_db(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict(what.to_string());
        }
        if db.is_foreign_key_violation() {
            return StoreError::NotFound(format!(
                "referenced row ({})",
                db.constraint().unwrap_or("foreign key")
            ));
        }
    }
    StoreError::Database(e)
}

/// Role store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RoleStore for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_admin_floor(&mut self) -> StoreResult<()> {
        // No admin role yet means no admin count to protect.
        sqlx::query("SELECT id FROM roles WHERE name = $1 FOR NO KEY UPDATE")
            .bind(ADMIN_ROLE)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn lock_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn find_user_by_username(&mut self, username: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn username_or_email_taken(
        &mut self,
        username: &str,
        email: &str,
    ) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 OR email = $2)",
        )
        .bind(username)
        .bind(email)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn email_taken_by_other(&mut self, email: &str, except: Uuid) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND id <> $2)",
        )
        .bind(email)
        .bind(except)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_user(&mut self, user: NewUser) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, username, email, password_hash, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| conflict_or_db(e, "username or email already exists"))?;
        Ok(user_from_row(row))
    }

    async fn list_users(&mut self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id"
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(user_from_row).collect())
    }

    async fn password_hash(&mut self, user_id: Uuid) -> StoreResult<Option<String>> {
        let hash = sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(hash)
    }

    async fn set_password_hash(&mut self, user_id: Uuid, hash: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(hash)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn set_email(&mut self, user_id: Uuid, email: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET email = $2 WHERE id = $1")
            .bind(user_id)
            .bind(email)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| conflict_or_db(e, "email already exists"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn set_last_login(&mut self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_user_cascade(&mut self, user_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM reset_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM login_logs WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn find_role(&mut self, name: &str) -> StoreResult<Option<Role>> {
        let row = sqlx::query_as::<_, (Uuid, String, Option<String>)>(
            "SELECT id, name, description FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|(id, name, description)| Role {
            id,
            name,
            description,
        }))
    }

    async fn insert_role(&mut self, role: Role) -> StoreResult<Role> {
        sqlx::query("INSERT INTO roles (id, name, description) VALUES ($1, $2, $3)")
            .bind(role.id)
            .bind(&role.name)
            .bind(&role.description)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| conflict_or_db(e, "role already exists"))?;
        Ok(role)
    }

    async fn list_roles(&mut self) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, (Uuid, String, Option<String>)>(
            "SELECT id, name, description FROM roles ORDER BY name",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, description)| Role {
                id,
                name,
                description,
            })
            .collect())
    }

    async fn user_role_names(&mut self, user_id: Uuid) -> StoreResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT r.name FROM user_roles ur \
             JOIN roles r ON r.id = ur.role_id \
             WHERE ur.user_id = $1 ORDER BY r.name",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(names)
    }

    async fn count_role_holders(&mut self, role_name: &str) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT ur.user_id) FROM user_roles ur \
             JOIN roles r ON r.id = ur.role_id \
             WHERE r.name = $1",
        )
        .bind(role_name)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn add_assignment(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, role_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_or_db(e, "assignment already exists"))?;
        Ok(())
    }

    async fn remove_assignment(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_login_log(&mut self, entry: LoginLogEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO login_logs (id, user_id, login_time, status, ip, user_agent) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.login_time)
        .bind(entry.status.as_str())
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_or_db(e, "login log entry already exists"))?;
        Ok(())
    }

    async fn login_logs_for(&mut self, user_id: Uuid) -> StoreResult<Vec<LoginLogEntry>> {
        let rows = sqlx::query_as::<_, LoginLogRow>(
            "SELECT id, user_id, login_time, status, ip, user_agent \
             FROM login_logs WHERE user_id = $1 \
             ORDER BY login_time DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(login_log_from_row).collect()
    }

    async fn insert_reset_token(&mut self, token: ResetTokenRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO reset_tokens (id, user_id, token_hash, expires_at, used, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.used)
        .bind(token.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_or_db(e, "reset token already exists"))?;
        Ok(())
    }

    async fn find_reset_token(
        &mut self,
        token_hash: &str,
    ) -> StoreResult<Option<ResetTokenRecord>> {
        // Row lock so two redemptions of the same token cannot both succeed.
        let row = sqlx::query_as::<_, ResetTokenRow>(
            "SELECT id, user_id, token_hash, expires_at, used, created_at \
             FROM reset_tokens WHERE token_hash = $1 FOR UPDATE",
        )
        .bind(token_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(reset_token_from_row))
    }

    async fn mark_reset_token_used(&mut self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE reset_tokens SET used = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn reset_tokens_for(&mut self, user_id: Uuid) -> StoreResult<Vec<ResetTokenRecord>> {
        let rows = sqlx::query_as::<_, ResetTokenRow>(
            "SELECT id, user_id, token_hash, expires_at, used, created_at \
             FROM reset_tokens WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(reset_token_from_row).collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
