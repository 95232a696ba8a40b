//! REST endpoints for direct task management.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch};
use axum::{Json, Router};
use uuid::Uuid;

use super::model::{NewTask, TaskUpdate};
use crate::auth::authorize;
use crate::error::TaskError;
use crate::server::{ApiError, AppState};

fn parse_task_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        TaskError::NotFound {
            id: raw.to_string(),
        }
        .into()
    })
}

/// POST /api/{user_id}/tasks
async fn create_task(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<NewTask>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(state.verifier.as_ref(), &headers, &user_id)?;
    let Json(body) = body?;
    let task = state
        .tasks
        .create(&user_id, &body.description, body.priority)
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/{user_id}/tasks
async fn list_tasks(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(state.verifier.as_ref(), &headers, &user_id)?;
    Ok(Json(state.tasks.list(&user_id).await?))
}

/// GET /api/{user_id}/tasks/{task_id}
async fn get_task(
    State(state): State<AppState>,
    Path((user_id, task_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(state.verifier.as_ref(), &headers, &user_id)?;
    let task_id = parse_task_id(&task_id)?;
    Ok(Json(state.tasks.get(&user_id, task_id).await?))
}

/// PUT /api/{user_id}/tasks/{task_id}
async fn update_task(
    State(state): State<AppState>,
    Path((user_id, task_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Json<TaskUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(state.verifier.as_ref(), &headers, &user_id)?;
    let task_id = parse_task_id(&task_id)?;
    let Json(update) = body?;
    Ok(Json(state.tasks.update(&user_id, task_id, update).await?))
}

/// DELETE /api/{user_id}/tasks/{task_id}
async fn delete_task(
    State(state): State<AppState>,
    Path((user_id, task_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(state.verifier.as_ref(), &headers, &user_id)?;
    let task_id = parse_task_id(&task_id)?;
    state.tasks.delete(&user_id, task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/{user_id}/tasks/{task_id}/complete
///
/// Toggles completion: an open task is completed, a completed one reopened.
async fn toggle_complete(
    State(state): State<AppState>,
    Path((user_id, task_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(state.verifier.as_ref(), &headers, &user_id)?;
    let task_id = parse_task_id(&task_id)?;
    Ok(Json(state.tasks.toggle_complete(&user_id, task_id).await?))
}

/// Build the task REST routes.
pub fn task_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/{user_id}/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/{user_id}/tasks/{task_id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/{user_id}/tasks/{task_id}/complete", patch(toggle_complete))
        .with_state(state)
}
