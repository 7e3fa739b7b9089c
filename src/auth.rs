//! Verified caller identity for analytics routes.
//!
//! The caller is always taken from the bearer token, never from path or query parameters.

use crate::config::ApiToken;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The verified subject of an inbound request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns a presented bearer token into a verified caller identity.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, bearer_token: &str) -> Option<CallerId>;
}

/// Verifies bearer tokens against a fixed table loaded from configuration.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, CallerId>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: &[ApiToken]) -> Self {
        let tokens = tokens
            .iter()
            .map(|t| (t.token.clone(), CallerId::new(t.caller_id.clone())))
            .collect();
        Self { tokens }
    }
}

impl IdentityVerifier for StaticTokenVerifier {
    fn verify(&self, bearer_token: &str) -> Option<CallerId> {
        self.tokens.get(bearer_token).cloned()
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Rejects requests without a verifiable bearer token and attaches the `CallerId` otherwise.
pub async fn require_caller(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let caller = bearer_token(&request).and_then(|token| state.verifier.verify(token));

    match caller {
        Some(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        None => {
            tracing::debug!(path = %request.uri().path(), "Rejected request without verified caller");
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                "Unauthorized",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new(&[
            ApiToken {
                token: "tok-alice".to_string(),
                caller_id: "alice".to_string(),
            },
            ApiToken {
                token: "tok-bob".to_string(),
                caller_id: "bob".to_string(),
            },
        ])
    }

    #[test]
    fn test_static_verifier() {
        let verifier = verifier();
        assert_eq!(verifier.verify("tok-bob"), Some(CallerId::new("bob")));
        assert_eq!(verifier.verify("alice"), None);
        assert_eq!(StaticTokenVerifier::default().verify("tok-alice"), None);
    }

    fn request_with(authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/api/analytics");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(
            bearer_token(&request_with(Some("Bearer tok-alice"))),
            Some("tok-alice")
        );
        assert_eq!(bearer_token(&request_with(Some("Basic dXNlcg=="))), None);
        assert_eq!(bearer_token(&request_with(Some("Bearer   "))), None);
        assert_eq!(bearer_token(&request_with(None)), None);
    }
}
