//! Bearer-token authentication for the `/api` routes.
//!
//! Token issuance lives outside this service. A `TokenVerifier` maps a
//! presented token to a user id; handlers then require that id to equal the
//! `{user_id}` path segment.

use std::collections::HashMap;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    Missing,

    #[error("Invalid authorization header format")]
    Malformed,

    #[error("Invalid or expired token")]
    Invalid,

    #[error("You do not have permission to access this resource")]
    Forbidden,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({"error": self.to_string()}))).into_response()
    }
}

/// Resolves a bearer token to the user it was issued for.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<String>;
}

/// Fixed token table loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Authenticate the request and check it acts for `user_id`.
/// Returns the authenticated user id.
pub fn authorize(
    verifier: &dyn TokenVerifier,
    headers: &HeaderMap,
    user_id: &str,
) -> Result<String, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::Malformed)?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Malformed)?;

    let authenticated = verifier.verify(token).ok_or(AuthError::Invalid)?;
    if authenticated != user_id {
        warn!(authenticated = %authenticated, path_user = user_id, "Identity mismatch");
        return Err(AuthError::Forbidden);
    }
    Ok(authenticated)
}
