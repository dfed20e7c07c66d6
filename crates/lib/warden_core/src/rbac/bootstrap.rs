//! Startup seeding: the `admin` and `user` roles and one administrator.
//!
//! Safe to run on every start. A second run on a seeded store changes
//! nothing.

use chrono::Utc;
use tracing::{error, info};

use super::engine::{MAX_EMAIL_LEN, MAX_USERNAME_LEN, required};
use super::{RbacError, RbacResult};
use crate::auth::password::PasswordHasher;
use crate::ids::new_id;
use crate::models::auth::{ADMIN_ROLE, NewUser, Role, USER_ROLE};
use crate::store::{RoleStore, StoreTx};

/// Credentials of the administrator created when none exists.
#[derive(Clone, Debug)]
pub struct SeedConfig {
    pub admin_username: String,
    pub admin_email: String,
    pub admin_password: String,
}

impl SeedConfig {
    /// Reads the seed account from environment variables with defaults.
    ///
    /// | Variable                | Default       |
    /// |-------------------------|---------------|
    /// | `WARDEN_ADMIN_USERNAME` | `admin`       |
    /// | `WARDEN_ADMIN_EMAIL`    | `admin@local` |
    /// | `WARDEN_ADMIN_PASSWORD` | `Admin123!`   |
    pub fn from_env() -> Self {
        Self {
            admin_username: std::env::var("WARDEN_ADMIN_USERNAME")
                .unwrap_or_else(|_| "admin".into()),
            admin_email: std::env::var("WARDEN_ADMIN_EMAIL")
                .unwrap_or_else(|_| "admin@local".into()),
            admin_password: std::env::var("WARDEN_ADMIN_PASSWORD")
                .unwrap_or_else(|_| "Admin123!".into()),
        }
    }

    /// Apply the account rules of `create_user`, naming the variable at fault.
    pub fn validate(&self) -> RbacResult<()> {
        required(&self.admin_username, "WARDEN_ADMIN_USERNAME", MAX_USERNAME_LEN)?;
        required(&self.admin_email, "WARDEN_ADMIN_EMAIL", MAX_EMAIL_LEN)?;
        if self.admin_password.trim().is_empty() {
            return Err(RbacError::Validation(
                "WARDEN_ADMIN_PASSWORD is required".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".into(),
            admin_email: "admin@local".into(),
            admin_password: "Admin123!".into(),
        }
    }
}

/// What a seed run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub roles_created: Vec<String>,
    /// The seed account was created.
    pub admin_created: bool,
    /// An existing account named like the seed account was given `admin`.
    pub admin_promoted: bool,
}

impl SeedReport {
    pub fn is_noop(&self) -> bool {
        self.roles_created.is_empty() && !self.admin_created && !self.admin_promoted
    }
}

async fn ensure_role(
    tx: &mut dyn StoreTx,
    name: &str,
    description: &str,
    report: &mut SeedReport,
) -> RbacResult<Role> {
    if let Some(role) = tx.find_role(name).await? {
        return Ok(role);
    }
    let role = tx
        .insert_role(Role {
            id: new_id(),
            name: name.to_string(),
            description: Some(description.to_string()),
        })
        .await?;
    report.roles_created.push(role.name.clone());
    Ok(role)
}

/// Ensure the base roles exist and at least one user holds `admin`.
pub async fn seed(
    store: &dyn RoleStore,
    hasher: &dyn PasswordHasher,
    config: &SeedConfig,
) -> RbacResult<SeedReport> {
    config.validate()?;
    let username = config.admin_username.trim();
    let email = config.admin_email.trim();

    let mut report = SeedReport::default();
    let mut tx = store.begin().await?;

    let admin = ensure_role(tx.as_mut(), ADMIN_ROLE, "Administrator", &mut report).await?;
    ensure_role(tx.as_mut(), USER_ROLE, "Standard user", &mut report).await?;

    tx.lock_admin_floor().await?;
    if tx.count_role_holders(ADMIN_ROLE).await? == 0 {
        match tx.find_user_by_username(username).await? {
            Some(existing) => {
                tx.add_assignment(existing.id, admin.id).await?;
                report.admin_promoted = true;
            }
            None => {
                // The username is free, so a hit here is the email.
                if tx.username_or_email_taken(username, email).await? {
                    error!(%email, "seed admin email belongs to another account");
                    return Err(RbacError::Conflict(format!(
                        "seed admin email '{email}' belongs to another account; \
                         set WARDEN_ADMIN_EMAIL to a free address"
                    )));
                }
                let user = tx
                    .insert_user(NewUser {
                        id: new_id(),
                        username: username.to_string(),
                        email: email.to_string(),
                        password_hash: hasher.hash(config.admin_password.trim())?,
                        created_at: Utc::now(),
                    })
                    .await?;
                tx.add_assignment(user.id, admin.id).await?;
                report.admin_created = true;
            }
        }
    }
    tx.commit().await?;

    if report.is_noop() {
        info!(backend = store.backend_name(), "seed: nothing to do");
    } else {
        info!(
            backend = store.backend_name(),
            roles_created = ?report.roles_created,
            admin_created = report.admin_created,
            admin_promoted = report.admin_promoted,
            %username,
            "seed applied"
        );
    }
    Ok(report)
}
