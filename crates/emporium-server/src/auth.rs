//! Bearer credential validation for the upgrade endpoint.
//!
//! Browsers cannot set headers on a WebSocket handshake, so the credential
//! may also arrive as a query parameter. The header wins when both are present.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;
use crate::ids::UserId;

/// Resolves a bearer credential to a stable user id.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate `token` and return its owner.
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// JWT claims accepted by [`JwtAuthenticator`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// HS256 JWT validator.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Validate tokens signed with `secret`, optionally requiring `issuer`.
    pub fn new(secret: &[u8], issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        let sub = data.claims.sub.trim();
        if sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".into()));
        }
        Ok(UserId::new(sub))
    }
}

/// Sign an HS256 token for `user` valid for `ttl_secs`.
pub fn issue_token(
    secret: &[u8],
    user: &UserId,
    ttl_secs: i64,
    issuer: Option<&str>,
) -> Result<String, AuthError> {
    let claims = Claims {
        sub: user.as_str().to_string(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
        iss: issuer.map(ToString::to_string),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(AuthError::from)
}

/// Pull the credential from `Authorization: Bearer`, falling back to the
/// `param` query parameter.
pub fn extract_token(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    param: &str,
) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
        })
        .filter(|t| !t.is_empty());

    from_header.or_else(|| {
        query
            .get(param)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &[u8] = b"test-secret";

    #[tokio::test]
    async fn valid_token_yields_subject() {
        let auth = JwtAuthenticator::new(SECRET, None);
        let token = issue_token(SECRET, &UserId::from("u1"), 60, None).unwrap();
        assert_eq!(auth.authenticate(&token).await.unwrap(), UserId::from("u1"));
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let auth = JwtAuthenticator::new(b"other", None);
        let token = issue_token(SECRET, &UserId::from("u1"), 60, None).unwrap();
        assert!(matches!(auth.authenticate(&token).await, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let auth = JwtAuthenticator::new(SECRET, None);
        // Well past the default validation leeway.
        let token = issue_token(SECRET, &UserId::from("u1"), -3600, None).unwrap();
        assert!(matches!(auth.authenticate(&token).await, Err(AuthError::Expired)));
    }

    #[tokio::test]
    async fn issuer_enforced_when_configured() {
        let auth = JwtAuthenticator::new(SECRET, Some("emporium"));
        let good = issue_token(SECRET, &UserId::from("u1"), 60, Some("emporium")).unwrap();
        let bad = issue_token(SECRET, &UserId::from("u1"), 60, Some("elsewhere")).unwrap();
        assert!(auth.authenticate(&good).await.is_ok());
        assert!(auth.authenticate(&bad).await.is_err());
    }

    #[tokio::test]
    async fn garbage_rejected() {
        let auth = JwtAuthenticator::new(SECRET, None);
        assert!(auth.authenticate("not.a.jwt").await.is_err());
    }

    #[test]
    fn header_preferred_over_query() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let query = HashMap::from([("token".to_string(), "xyz".to_string())]);
        assert_eq!(extract_token(&headers, &query, "token").as_deref(), Some("abc"));
    }

    #[test]
    fn query_fallback() {
        let query = HashMap::from([("token".to_string(), "xyz".to_string())]);
        assert_eq!(extract_token(&HeaderMap::new(), &query, "token").as_deref(), Some("xyz"));
        assert_eq!(extract_token(&HeaderMap::new(), &query, "access_token"), None);
    }

    #[test]
    fn non_bearer_scheme_ignored() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(extract_token(&headers, &HashMap::new(), "token"), None);
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_token(&headers, &HashMap::new(), "token").as_deref(), Some("abc"));
    }
}
