//! # warden_api
//!
//! HTTP API library for Warden.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use warden_core::auth::accounts::Accounts;
use warden_core::auth::password::PasswordHasher;
use warden_core::rbac::engine::RoleEngine;
use warden_core::store::RoleStore;

use crate::config::ApiConfig;
use crate::handlers::{admin_users, auth, profile};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: RoleEngine,
    pub accounts: Accounts,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RoleStore>,
        hasher: Arc<dyn PasswordHasher>,
        config: ApiConfig,
    ) -> Self {
        Self {
            engine: RoleEngine::new(store.clone(), hasher.clone()),
            accounts: Accounts::new(store, hasher),
            config,
        }
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let require_auth =
        axum::middleware::from_fn_with_state(state.clone(), middleware::auth::require_auth);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::GET_AUTH_STATUS, get(auth::auth_status_handler))
        .route(
            routes::POST_AUTH_PASSWORD_RESET,
            post(auth::password_reset_handler),
        );

    // Any signed-in user
    let user = Router::new()
        .route(
            routes::ME,
            get(profile::me_handler).patch(profile::update_me_handler),
        )
        .route(
            routes::POST_ME_PASSWORD,
            post(profile::change_password_handler),
        )
        .route_layer(require_auth.clone());

    // Administrators; layers run bottom-up, so auth precedes the admin check.
    let admin = Router::new()
        .route(
            routes::ADMIN_USERS,
            get(admin_users::list_users_handler).post(admin_users::create_user_handler),
        )
        .route(
            routes::DELETE_ADMIN_USERS_ID,
            delete(admin_users::delete_user_handler),
        )
        .route(routes::GET_ADMIN_ROLES, get(admin_users::list_roles_handler))
        .route(
            routes::POST_ADMIN_USERS_ID_GRANT,
            post(admin_users::grant_role_handler),
        )
        .route(
            routes::POST_ADMIN_USERS_ID_REVOKE,
            post(admin_users::revoke_role_handler),
        )
        .route(
            routes::POST_ADMIN_USERS_ID_RESET_PASSWORD,
            post(admin_users::reset_password_handler),
        )
        .route(
            routes::POST_ADMIN_USERS_ID_RESET_TOKEN,
            post(admin_users::reset_token_handler),
        )
        .route(
            routes::GET_ADMIN_USERS_ID_LOGINS,
            get(admin_users::login_history_handler),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_admin,
        ))
        .route_layer(require_auth);

    Router::new()
        .merge(public)
        .merge(user)
        .merge(admin)
        .layer(cors)
        .with_state(state)
}
