//! # warden_core
//!
//! User accounts, roles and the integrity rules around them. Storage is
//! pluggable through [`store::RoleStore`] with in-memory and PostgreSQL
//! backends.

pub mod auth;
pub mod ids;
pub mod models;
pub mod rbac;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
