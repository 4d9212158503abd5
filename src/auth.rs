//! Request-scoped shopper identity.
//!
//! Every cart and order endpoint resolves who is calling exactly once, at
//! extraction time: a bearer JWT identifies an authenticated user, and the
//! guest cart cookie identifies an anonymous browser session. Handlers then
//! pass the resolved [`Shopper`] down to services explicitly.

use crate::{config::AppConfig, errors::ApiError, AppState};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SESSION_TOKEN_LEN: usize = 32;

/// JWT claims issued by the auth backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id
    pub sub: String,
    /// Expiration timestamp (seconds since epoch)
    pub exp: usize,
}

/// The caller of a cart/checkout/order endpoint.
///
/// `user_id` is set when a valid bearer token was presented, `session_token`
/// when the guest cart cookie was present. A brand-new guest has neither;
/// write endpoints mint a token for them via [`mint_session_token`].
#[derive(Debug, Clone, Default)]
pub struct Shopper {
    pub user_id: Option<Uuid>,
    pub session_token: Option<String>,
}

impl Shopper {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            session_token: None,
        }
    }

    pub fn guest(session_token: impl Into<String>) -> Self {
        Self {
            user_id: None,
            session_token: Some(session_token.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// True when the caller has no way to own a cart yet.
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none() && self.session_token.is_none()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Shopper {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        shopper_from_headers(&parts.headers, &state.config)
    }
}

/// Extractor that rejects unauthenticated callers with 401.
#[derive(Debug, Clone)]
pub struct RequireUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for RequireUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let shopper = shopper_from_headers(&parts.headers, &state.config)?;
        shopper.user_id.map(RequireUser).ok_or(ApiError::Unauthorized)
    }
}

/// Resolves the shopper from the Authorization and Cookie headers.
///
/// A present-but-invalid bearer token is rejected rather than silently
/// downgraded to a guest, so a shopper with an expired session gets a 401
/// instead of an empty cart.
pub fn shopper_from_headers(headers: &HeaderMap, config: &AppConfig) -> Result<Shopper, ApiError> {
    let user_id = match bearer_token(headers) {
        Some(token) => Some(verify_token(token, &config.jwt_secret)?),
        None => None,
    };

    let session_token = cookie_value(headers, &config.cart_cookie_name);

    Ok(Shopper {
        user_id,
        session_token,
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn verify_token(token: &str, secret: &str) -> Result<Uuid, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| ApiError::Unauthorized)?;

    Uuid::parse_str(&data.claims.sub).map_err(|_| ApiError::Unauthorized)
}

/// Reads a single cookie out of the Cookie header(s).
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k.trim() == name).then(|| v.trim().to_string())
        })
        .next()
}

/// Mints a fresh guest session token. Only write endpoints call this; read
/// endpoints never set the cookie for a shopper who has no cart.
pub fn mint_session_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Builds the Set-Cookie header value for the guest cart cookie.
pub fn cart_cookie_header(config: &AppConfig, token: &str) -> Option<HeaderValue> {
    let max_age_secs = config.cart_cookie_max_age_days * 24 * 60 * 60;
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        config.cart_cookie_name, token, max_age_secs
    );
    if !config.is_development() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}
