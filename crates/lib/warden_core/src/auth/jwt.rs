//! JWT access tokens.

use std::path::PathBuf;

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{info, warn};

use super::AuthError;
use crate::models::auth::{TokenClaims, UserWithRoles};

/// Access token lifetime: 15 minutes.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 15 * 60;

/// Issue a signed access token (HS256) for an authenticated user.
pub fn generate_access_token(user: &UserWithRoles, secret: &[u8]) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = TokenClaims {
        sub: user.user.id.to_string(),
        username: user.user.username.clone(),
        roles: user.roles.clone(),
        exp: (now + Duration::seconds(ACCESS_TOKEN_EXPIRY_SECS)).timestamp(),
        iat: now.timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .map_err(|e| AuthError::TokenError(format!("jwt encode: {e}")))
}

/// Verify an access token, returning the claims when signature and expiry hold.
pub fn verify_access_token(token: &str, secret: &[u8]) -> Option<TokenClaims> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::default();
    validation.validate_exp = true;
    decode::<TokenClaims>(token, &key, &validation)
        .ok()
        .map(|data| data.claims)
}

/// Resolve the signing secret: `JWT_SECRET` → `AUTH_SECRET` → persisted file.
///
/// When neither variable is set a random secret is generated once and kept
/// under the platform data directory so tokens survive restarts.
pub fn resolve_jwt_secret() -> String {
    for var in ["JWT_SECRET", "AUTH_SECRET"] {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return secret;
        }
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(path = %parent.display(), error = %e, "cannot create secret directory");
    }
    match std::fs::write(&secret_path, &secret) {
        Ok(()) => info!(path = %secret_path.display(), "generated new JWT secret"),
        Err(e) => warn!(error = %e, "JWT secret not persisted; tokens reset on restart"),
    }
    secret
}

fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("jwt-secret")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::new_id;
    use crate::models::auth::User;

    fn alice() -> UserWithRoles {
        UserWithRoles {
            user: User {
                id: new_id(),
                username: "alice".into(),
                email: "alice@x.com".into(),
                is_active: true,
                created_at: Utc::now(),
                last_login_at: None,
            },
            roles: vec!["user".into()],
        }
    }

    #[test]
    fn issued_token_verifies_with_same_secret() {
        let user = alice();
        let token = generate_access_token(&user, b"secret").unwrap();
        let claims = verify_access_token(&token, b"secret").expect("valid token");
        assert_eq!(claims.sub, user.user.id.to_string());
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.roles, vec!["user".to_string()]);
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_EXPIRY_SECS);
    }

    #[test]
    fn token_rejected_with_other_secret() {
        let token = generate_access_token(&alice(), b"secret").unwrap();
        assert!(verify_access_token(&token, b"other").is_none());
        assert!(verify_access_token("garbage", b"secret").is_none());
    }
}
