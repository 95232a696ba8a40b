//! Integration tests for the chat and task REST API.
//!
//! Each test spins up an Axum server on a random port backed by an in-memory
//! database and a stub model, then exercises the real HTTP contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tower::ServiceExt;

use todo_chat::agent::{ConversationalAgent, TurnOrchestrator};
use todo_chat::auth::StaticTokenVerifier;
use todo_chat::chat::{MessageLog, RateLimiter};
use todo_chat::config::AgentConfig;
use todo_chat::error::LlmError;
use todo_chat::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};
use todo_chat::server::{AppState, app};
use todo_chat::store::{Database, LibSqlBackend};
use todo_chat::tasks::TaskService;
use todo_chat::tools::ToolExecutor;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const ALICE: &str = "tok-alice";
const BOB: &str = "tok-bob";

/// Stub model: "add X" proposes `add_task`, tool results get an
/// acknowledgement, "explode" fails, anything else gets a greeting.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: "Summary".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let (content, tool_calls) = if last.starts_with("[tool results]") {
            (Some("All done.".to_string()), Vec::new())
        } else if let Some(description) = last.strip_prefix("add ") {
            let call = ToolCall {
                id: "call_0".to_string(),
                name: "add_task".to_string(),
                arguments: json!({"description": description, "user_id": "bob"}),
            };
            (None, vec![call])
        } else if last == "explode" {
            return Err(LlmError::AuthFailed {
                provider: "stub".to_string(),
            });
        } else {
            (Some("Hello!".to_string()), Vec::new())
        };

        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

async fn build_state(rate_limit: u32) -> AppState {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let config = AgentConfig {
        max_upstream_retries: 0,
        ..Default::default()
    };
    let tasks = TaskService::new(Arc::clone(&db));
    let log = MessageLog::new(Arc::clone(&db));
    let orchestrator = TurnOrchestrator::new(
        log.clone(),
        ConversationalAgent::new(Arc::new(StubLlm), config.clone()),
        ToolExecutor::new(tasks.clone()),
        config,
    );
    let tokens = HashMap::from([
        (ALICE.to_string(), "alice".to_string()),
        (BOB.to_string(), "bob".to_string()),
    ]);

    AppState {
        tasks,
        log,
        orchestrator: Arc::new(orchestrator),
        verifier: Arc::new(StaticTokenVerifier::new(tokens)),
        rate_limiter: Arc::new(RateLimiter::per_minute(rate_limit)),
    }
}

/// Start an Axum server on a random port, return its base URL.
async fn start_server(rate_limit: u32) -> String {
    let router = app(build_state(rate_limit).await, &["http://localhost:3000".to_string()]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

async fn chat(client: &Client, base: &str, token: &str, user: &str, message: &str) -> reqwest::Response {
    client
        .post(format!("{base}/api/{user}/chat"))
        .bearer_auth(token)
        .json(&json!({"message": message}))
        .send()
        .await
        .unwrap()
}

// ── Router-level ────────────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_token() {
    let router = app(build_state(10).await, &[]);
    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_without_token_is_unauthorized() {
    let router = app(build_state(10).await, &[]);
    let response = router
        .oneshot(Request::get("/api/alice/tasks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ── Chat ────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_adds_task_and_records_history() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server(10).await;
        let client = Client::new();

        let response = chat(&client, &base, ALICE, "alice", "add buy milk").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["user_message"], "add buy milk");
        assert_eq!(body["reply"], "All done.");
        assert_eq!(body["operations"][0]["name"], "add_task");
        assert_eq!(body["operations"][0]["outcome"], "success");

        // The identity argument in the tool call was ignored.
        let tasks: Value = client
            .get(format!("{base}/api/alice/tasks"))
            .bearer_auth(ALICE)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tasks.as_array().unwrap().len(), 1);
        assert_eq!(tasks[0]["description"], "buy milk");
        assert_eq!(tasks[0]["priority"], "Medium");

        let bob_tasks: Value = client
            .get(format!("{base}/api/bob/tasks"))
            .bearer_auth(BOB)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(bob_tasks.as_array().unwrap().is_empty());

        let history: Value = client
            .get(format!("{base}/api/alice/chat/history"))
            .bearer_auth(ALICE)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history["total_count"], 2);
        assert_eq!(history["messages"][0]["sender"], "user");
        assert_eq!(history["messages"][1]["sender"], "assistant");
        assert_eq!(history["messages"][1]["id"], body["assistant_message_id"]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn blank_message_is_bad_request() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server(10).await;
        let client = Client::new();

        let response = chat(&client, &base, ALICE, "alice", "   ").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Message cannot be empty");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn upstream_failure_is_bad_gateway_and_keeps_user_message() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server(10).await;
        let client = Client::new();

        let response = chat(&client, &base, ALICE, "alice", "explode").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let history: Value = client
            .get(format!("{base}/api/alice/chat/history"))
            .bearer_auth(ALICE)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history["total_count"], 1);
        assert_eq!(history["messages"][0]["content"], "explode");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn chat_for_another_user_is_forbidden() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server(10).await;
        let client = Client::new();

        let response = chat(&client, &base, ALICE, "bob", "hello").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = client
            .get(format!("{base}/api/bob/chat/history"))
            .bearer_auth(ALICE)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn chat_is_rate_limited_per_user() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server(2).await;
        let client = Client::new();

        for _ in 0..2 {
            let response = chat(&client, &base, ALICE, "alice", "hi").await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = chat(&client, &base, ALICE, "alice", "hi").await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Too many requests. Please try again later.");

        // Another user has their own budget.
        let response = chat(&client, &base, BOB, "bob", "hi").await;
        assert_eq!(response.status(), StatusCode::OK);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn history_pagination_and_erase() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server(10).await;
        let client = Client::new();

        for message in ["one", "two", "three"] {
            chat(&client, &base, ALICE, "alice", message).await;
        }

        let page: Value = client
            .get(format!("{base}/api/alice/chat/history?limit=2&offset=2"))
            .bearer_auth(ALICE)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(page["total_count"], 6);
        let messages = page["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "two");
        assert_eq!(messages[1]["content"], "Hello!");

        let erased: Value = client
            .delete(format!("{base}/api/alice/chat/history"))
            .bearer_auth(ALICE)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(erased["deleted"], 6);
    })
    .await
    .expect("test timed out");
}

// ── Tasks ───────────────────────────────────────────────────────────

#[tokio::test]
async fn task_crud_round() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server(10).await;
        let client = Client::new();

        let response = client
            .post(format!("{base}/api/alice/tasks"))
            .bearer_auth(ALICE)
            .json(&json!({"description": "  water plants ", "priority": "High"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let task: Value = response.json().await.unwrap();
        assert_eq!(task["description"], "water plants");
        let id = task["id"].as_str().unwrap().to_string();

        let updated: Value = client
            .put(format!("{base}/api/alice/tasks/{id}"))
            .bearer_auth(ALICE)
            .json(&json!({"priority": "Low"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["priority"], "Low");
        assert_eq!(updated["description"], "water plants");

        let toggled: Value = client
            .patch(format!("{base}/api/alice/tasks/{id}/complete"))
            .bearer_auth(ALICE)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(toggled["completed"], true);

        // Bob cannot see Alice's task even by id.
        let response = client
            .get(format!("{base}/api/bob/tasks/{id}"))
            .bearer_auth(BOB)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = client
            .delete(format!("{base}/api/alice/tasks/{id}"))
            .bearer_auth(ALICE)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = client
            .get(format!("{base}/api/alice/tasks/{id}"))
            .bearer_auth(ALICE)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn invalid_task_input_is_bad_request() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server(10).await;
        let client = Client::new();

        for body in [
            json!({"description": "   "}),
            json!({"description": "x", "priority": "Urgent"}),
        ] {
            let response = client
                .post(format!("{base}/api/alice/tasks"))
                .bearer_auth(ALICE)
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        }
    })
    .await
    .expect("test timed out");
}
