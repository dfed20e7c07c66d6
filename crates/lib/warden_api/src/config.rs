//! API server configuration.

use chrono::Duration;
use tracing::warn;
use warden_core::auth::jwt::resolve_jwt_secret;

/// Password given to accounts created without one.
pub const DEFAULT_INITIAL_PASSWORD: &str = "Init123!";

/// Default lifetime of admin-issued reset tokens, in minutes.
pub const DEFAULT_RESET_TOKEN_TTL_MINUTES: i64 = 60;

/// Longest accepted reset token lifetime: 30 days.
pub const MAX_RESET_TOKEN_TTL_MINUTES: i64 = 30 * 24 * 60;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3200").
    pub bind_addr: String,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Password for `POST /admin/users` requests that omit one.
    pub initial_password: String,
    pub reset_token_ttl_minutes: i64,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                          | Default                       |
    /// |-----------------------------------|-------------------------------|
    /// | `BIND_ADDR`                       | `127.0.0.1:3200`              |
    /// | `JWT_SECRET` / `AUTH_SECRET`      | generated & persisted to file |
    /// | `WARDEN_INITIAL_PASSWORD`         | `Init123!`                    |
    /// | `WARDEN_RESET_TOKEN_TTL_MINUTES`  | `60` (at most `43200`)        |
    pub fn from_env() -> Self {
        let reset_token_ttl_minutes = match std::env::var("WARDEN_RESET_TOKEN_TTL_MINUTES") {
            Ok(raw) => match raw.parse::<i64>() {
                Ok(m) if valid_ttl_minutes(m) => m,
                _ => {
                    warn!(
                        value = %raw,
                        max = MAX_RESET_TOKEN_TTL_MINUTES,
                        "ignoring WARDEN_RESET_TOKEN_TTL_MINUTES, using default"
                    );
                    DEFAULT_RESET_TOKEN_TTL_MINUTES
                }
            },
            Err(_) => DEFAULT_RESET_TOKEN_TTL_MINUTES,
        };
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3200".into()),
            jwt_secret: resolve_jwt_secret(),
            initial_password: std::env::var("WARDEN_INITIAL_PASSWORD")
                .unwrap_or_else(|_| DEFAULT_INITIAL_PASSWORD.into()),
            reset_token_ttl_minutes,
        }
    }

    /// Reset token lifetime. Values outside `1..=MAX_RESET_TOKEN_TTL_MINUTES`
    /// fall back to the default.
    pub fn reset_token_ttl(&self) -> Duration {
        let minutes = if valid_ttl_minutes(self.reset_token_ttl_minutes) {
            self.reset_token_ttl_minutes
        } else {
            warn!(
                value = self.reset_token_ttl_minutes,
                max = MAX_RESET_TOKEN_TTL_MINUTES,
                "reset token lifetime out of range, using default"
            );
            DEFAULT_RESET_TOKEN_TTL_MINUTES
        };
        Duration::try_minutes(minutes).unwrap_or_else(default_ttl)
    }
}

fn valid_ttl_minutes(minutes: i64) -> bool {
    (1..=MAX_RESET_TOKEN_TTL_MINUTES).contains(&minutes)
}

fn default_ttl() -> Duration {
    Duration::seconds(DEFAULT_RESET_TOKEN_TTL_MINUTES * 60)
}
