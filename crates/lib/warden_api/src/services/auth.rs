//! Login: credential check via `warden_core` plus access-token issue.

use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use warden_core::auth::accounts::LoginMeta;
use warden_core::auth::jwt::{ACCESS_TOKEN_EXPIRY_SECS, generate_access_token};

use crate::AppState;
use crate::error::AppResult;
use crate::models::TokenResponse;

/// Client address and user agent for the login log.
///
/// The address is the first `X-Forwarded-For` hop, else `X-Real-IP`.
pub fn login_meta(headers: &HeaderMap) -> LoginMeta {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let ip = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header("x-real-ip"))
        .map(str::to_string);
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    LoginMeta { ip, user_agent }
}

/// Authenticate with username + password and issue an access token.
pub async fn login(
    state: &AppState,
    username: &str,
    password: &str,
    meta: LoginMeta,
) -> AppResult<TokenResponse> {
    let user = state.accounts.authenticate(username, password, meta).await?;
    let access_token = generate_access_token(&user, state.config.jwt_secret.as_bytes())?;
    Ok(TokenResponse {
        access_token,
        expires_in: ACCESS_TOKEN_EXPIRY_SECS,
        token_type: "Bearer".to_string(),
        user: user.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn login_meta_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.9.9.9"));
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8"));
        let meta = login_meta(&headers);
        assert_eq!(meta.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn login_meta_without_headers_is_empty() {
        let meta = login_meta(&HeaderMap::new());
        assert!(meta.ip.is_none());
        assert!(meta.user_agent.is_none());
    }
}
