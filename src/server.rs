//! HTTP server: shared state, error-to-status mapping, and the router.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::agent::TurnOrchestrator;
use crate::auth::{AuthError, TokenVerifier};
use crate::chat::routes::chat_routes;
use crate::chat::{MessageLog, RateLimiter};
use crate::error::{ChatError, TaskError};
use crate::tasks::TaskService;
use crate::tasks::routes::task_routes;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskService,
    pub log: MessageLog,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Everything a handler can fail with, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Too many requests. Please try again later.")]
    RateLimited { retry_after: Duration },
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Auth(e) => e.status(),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Chat(e) => match e {
                ChatError::Validation(_) => StatusCode::BAD_REQUEST,
                ChatError::Authorization => StatusCode::FORBIDDEN,
                ChatError::Upstream(_) => StatusCode::BAD_GATEWAY,
                ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Task(e) => match e {
                TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
                TaskError::Invalid(_) => StatusCode::BAD_REQUEST,
                TaskError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Client-facing message. Internal failures are logged, not echoed.
    fn message(&self) -> String {
        match self {
            Self::Chat(ChatError::Storage(_)) | Self::Task(TaskError::Database(_)) => {
                "Internal server error".to_string()
            }
            Self::Chat(ChatError::Upstream(_)) => {
                "The assistant is temporarily unavailable. Please try again.".to_string()
            }
            Self::Chat(ChatError::Timeout(_)) => {
                "The assistant took too long to respond. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = Json(json!({"error": self.message()}));
        match self {
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                let mut response = (status, body).into_response();
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            _ => (status, body).into_response(),
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(origins)
}

/// Build the full application router.
pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(task_routes(state.clone()))
        .merge(chat_routes(state))
        .layer(cors_layer(cors_origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatabaseError, LlmError};

    #[test]
    fn status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (ChatError::Validation("x".into()).into(), StatusCode::BAD_REQUEST),
            (AuthError::Missing.into(), StatusCode::UNAUTHORIZED),
            (AuthError::Forbidden.into(), StatusCode::FORBIDDEN),
            (TaskError::NotFound { id: "1".into() }.into(), StatusCode::NOT_FOUND),
            (
                ApiError::RateLimited {
                    retry_after: Duration::from_secs(60),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ChatError::Storage(DatabaseError::Query("boom".into())).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ChatError::Upstream(LlmError::AuthFailed {
                    provider: "openai".into(),
                })
                .into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ChatError::Timeout(Duration::from_secs(60)).into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status(), expected, "{err}");
        }
    }

    #[test]
    fn storage_details_are_not_echoed() {
        let err = ApiError::from(ChatError::Storage(DatabaseError::Query(
            "no such table: secrets".into(),
        )));
        assert_eq!(err.message(), "Internal server error");
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after: Duration::from_secs(42),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
