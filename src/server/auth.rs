//! Credential validation.
//!
//! A credential is presented as `Authorization: Bearer <token>` or as a
//! `?token=` query parameter on the connection request. Validators only
//! check tokens; issuing them is somebody else's job.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::state::ServerState;
use crate::protocol::{ErrorBody, ToolError};

pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const QUERY_TOKEN_KEY: &str = "token";

/// Who a validated credential belongs to, when the credential says so.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub subject: Option<String>,
}

#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Returns the identity behind `token`, or `None` if it is not valid.
    async fn validate(&self, token: &str) -> Option<Identity>;
}

/// Accepts a fixed set of API keys.
pub struct StaticKeyValidator {
    keys: HashSet<String>,
}

impl StaticKeyValidator {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CredentialValidator for StaticKeyValidator {
    async fn validate(&self, token: &str) -> Option<Identity> {
        self.keys
            .contains(token)
            .then(Identity::default)
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// Accepts HS256-signed JWTs; the identity is the `sub` claim.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl CredentialValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Option<Identity> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Some(Identity {
                subject: data.claims.sub,
            }),
            Err(e) => {
                debug!("Rejected JWT: {}", e);
                None
            }
        }
    }
}

/// Accepts a token if any inner validator does.
pub struct AnyValidator {
    validators: Vec<Arc<dyn CredentialValidator>>,
}

impl AnyValidator {
    pub fn new(validators: Vec<Arc<dyn CredentialValidator>>) -> Self {
        Self { validators }
    }
}

#[async_trait]
impl CredentialValidator for AnyValidator {
    async fn validate(&self, token: &str) -> Option<Identity> {
        for validator in &self.validators {
            if let Some(identity) = validator.validate(token).await {
                return Some(identity);
            }
        }
        None
    }
}

fn extract_token_from_headers(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(HEADER_AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn extract_token_from_query(parts: &Parts) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri).ok()?;
    params.get(QUERY_TOKEN_KEY).cloned().filter(|t| !t.is_empty())
}

/// A request that presented a valid credential.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: Identity,
}

pub struct Unauthorized;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        let err = ToolError::Unauthorized;
        let body: ErrorBody = (&err).into();
        (err.kind().http_status(), Json(json!({ "error": body }))).into_response()
    }
}

async fn authenticate(parts: &Parts, state: &ServerState) -> Option<Authenticated> {
    let token = match extract_token_from_headers(parts).or_else(|| extract_token_from_query(parts)) {
        Some(token) => token,
        None => {
            debug!("No credential in headers nor query.");
            return None;
        }
    };

    state
        .validator
        .validate(&token)
        .await
        .map(|identity| Authenticated { identity })
}

impl FromRequestParts<ServerState> for Authenticated {
    type Rejection = Unauthorized;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await.ok_or(Unauthorized)
    }
}

impl FromRequestParts<ServerState> for Option<Authenticated> {
    type Rejection = Unauthorized;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        Ok(authenticate(parts, state).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: u64,
    }

    fn make_jwt(secret: &str, exp: u64) -> String {
        encode(
            &Header::default(),
            &TestClaims {
                sub: "octocat".to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn parts_of(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[tokio::test]
    async fn test_static_keys() {
        let validator = StaticKeyValidator::new(["key-1", "key-2"]);

        assert_eq!(validator.validate("key-2").await, Some(Identity::default()));
        assert_eq!(validator.validate("nope").await, None);
    }

    #[tokio::test]
    async fn test_jwt_subject_becomes_identity() {
        let validator = JwtValidator::new("s3cret");
        let far_future = chrono::Utc::now().timestamp() as u64 + 3600;

        let identity = validator.validate(&make_jwt("s3cret", far_future)).await.unwrap();
        assert_eq!(identity.subject.as_deref(), Some("octocat"));

        assert!(validator.validate(&make_jwt("other", far_future)).await.is_none());
        assert!(validator.validate(&make_jwt("s3cret", 1_000)).await.is_none());
        assert!(validator.validate("garbage").await.is_none());
    }

    #[tokio::test]
    async fn test_any_validator() {
        let validator = AnyValidator::new(vec![
            Arc::new(JwtValidator::new("s3cret")),
            Arc::new(StaticKeyValidator::new(["static"])),
        ]);

        assert!(validator.validate("static").await.is_some());
        assert!(validator.validate("other").await.is_none());
    }

    #[test]
    fn test_token_extraction() {
        let parts = parts_of(
            Request::builder()
                .uri("/v1/ws")
                .header(HEADER_AUTHORIZATION, "Bearer abc")
                .body(())
                .unwrap(),
        );
        assert_eq!(extract_token_from_headers(&parts).as_deref(), Some("abc"));

        let parts = parts_of(Request::builder().uri("/v1/ws?token=xyz%3D").body(()).unwrap());
        assert_eq!(extract_token_from_headers(&parts), None);
        assert_eq!(extract_token_from_query(&parts).as_deref(), Some("xyz="));

        let parts = parts_of(Request::builder().uri("/v1/ws?token=").body(()).unwrap());
        assert_eq!(extract_token_from_query(&parts), None);
    }
}
