//! Consumer authentication
//!
//! Consumers must present a credential when the WebSocket upgrade is
//! requested. The relay only needs a yes/no answer plus the caller's
//! identity; issuing credentials happens elsewhere.

use axum::http::{header, HeaderMap};
use axum_extra::extract::CookieJar;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the cookie carrying the consumer's token
pub const TOKEN_COOKIE: &str = "token";

/// Verified caller identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub role: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingCredential,
    #[error("token validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Verifies a presented credential
pub trait Authenticator: Send + Sync + 'static {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub role: String,
    pub exp: u64,
}

/// HS256 JWT verifier
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(credential, &self.key, &self.validation)?;
        Ok(Identity {
            user_id: data.claims.user_id,
            role: data.claims.role,
        })
    }
}

/// Pull the credential out of an upgrade request
///
/// The `token` cookie wins; otherwise an `Authorization: Bearer` header is
/// accepted for non-browser clients.
pub fn extract_credential(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(TOKEN_COOKIE) {
        let value = cookie.value().trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extract and verify the credential of an upgrade request
pub fn authenticate(
    authenticator: &dyn Authenticator,
    jar: &CookieJar,
    headers: &HeaderMap,
) -> Result<Identity, AuthError> {
    let credential = extract_credential(jar, headers).ok_or(AuthError::MissingCredential)?;
    authenticator.verify(&credential)
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    const SECRET: &[u8] = b"test-secret";

    fn token(secret: &[u8], exp_offset_secs: i64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let claims = Claims {
            user_id: 42,
            role: "user".into(),
            exp: (now + exp_offset_secs) as u64,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn test_valid_token() {
        let auth = JwtAuthenticator::hs256(SECRET);
        let identity = auth.verify(&token(SECRET, 3600)).unwrap();

        assert_eq!(
            identity,
            Identity {
                user_id: 42,
                role: "user".into()
            }
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = JwtAuthenticator::hs256(SECRET);
        assert!(matches!(
            auth.verify(&token(b"other", 3600)),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = JwtAuthenticator::hs256(SECRET);
        assert!(auth.verify(&token(SECRET, -3600)).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let auth = JwtAuthenticator::hs256(SECRET);
        assert!(auth.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_extract_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; token=abc.def.ghi"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer other"));
        let jar = CookieJar::from_headers(&headers);

        assert_eq!(extract_credential(&jar, &headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_extract_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        let jar = CookieJar::from_headers(&headers);

        assert_eq!(extract_credential(&jar, &headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_authenticate() {
        let auth = JwtAuthenticator::hs256(SECRET);

        let headers = HeaderMap::new();
        let jar = CookieJar::from_headers(&headers);
        assert!(matches!(
            authenticate(&auth, &jar, &headers),
            Err(AuthError::MissingCredential)
        ));

        let mut headers = HeaderMap::new();
        let cookie = format!("token={}", token(SECRET, 3600));
        headers.insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        let jar = CookieJar::from_headers(&headers);
        assert_eq!(authenticate(&auth, &jar, &headers).unwrap().user_id, 42);
    }

    #[test]
    fn test_extract_missing() {
        let headers = HeaderMap::new();
        let jar = CookieJar::from_headers(&headers);

        assert!(extract_credential(&jar, &headers).is_none());
    }
}
