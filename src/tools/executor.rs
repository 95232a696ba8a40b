//! Tool executor: performs catalogue operations for one authenticated user.
//!
//! The acting identity is always the `owner_id` argument handed in by the
//! caller. Identity-looking fields in model-supplied arguments are dropped.

use std::time::Instant;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{TaskError, ToolError};
use crate::tasks::TaskService;
use crate::tasks::model::Task;
use crate::tools::catalogue::{TaskCommand, TaskTool};

/// Argument keys that claim an identity. Never honored.
const IDENTITY_KEYS: &[&str] = &["user_id", "owner_id", "userId", "ownerId", "user"];

/// A tool call proposed by the agent, tagged with the turn that asked for it.
#[derive(Debug, Clone)]
pub struct ToolInvocationRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub turn_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(ToolError),
}

/// What happened when a tool ran. `summary` is readable by both the agent
/// and the end user.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
    pub summary: String,
}

impl ToolInvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }

    /// `success`, or the failure kind.
    pub fn outcome_label(&self) -> &'static str {
        match &self.outcome {
            ToolOutcome::Success(_) => "success",
            ToolOutcome::Failure(e) => e.kind(),
        }
    }
}

#[derive(Serialize)]
struct TaskView<'a> {
    id: String,
    description: &'a str,
    priority: &'static str,
    completed: bool,
}

impl<'a> From<&'a Task> for TaskView<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            id: task.id.to_string(),
            description: &task.description,
            priority: task.priority.as_str(),
            completed: task.completed,
        }
    }
}

fn task_value(task: &Task) -> Value {
    serde_json::to_value(TaskView::from(task)).unwrap_or(Value::Null)
}

#[derive(Clone)]
pub struct ToolExecutor {
    tasks: TaskService,
}

impl ToolExecutor {
    pub fn new(tasks: TaskService) -> Self {
        Self { tasks }
    }

    /// Run one invocation. Failures are reported in the result, never raised.
    pub async fn execute(
        &self,
        owner_id: &str,
        request: &ToolInvocationRequest,
    ) -> ToolInvocationResult {
        let start = Instant::now();
        let outcome = self.run(owner_id, request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let (outcome, summary) = match outcome {
            Ok((value, summary)) => {
                debug!(
                    turn_id = %request.turn_id,
                    tool = %request.name,
                    elapsed_ms,
                    "Tool succeeded"
                );
                (ToolOutcome::Success(value), summary)
            }
            Err(err) => {
                warn!(
                    turn_id = %request.turn_id,
                    tool = %request.name,
                    elapsed_ms,
                    error = %err,
                    "Tool failed"
                );
                let summary = err.to_string();
                (ToolOutcome::Failure(err), summary)
            }
        };

        ToolInvocationResult {
            call_id: request.call_id.clone(),
            name: request.name.clone(),
            outcome,
            summary,
        }
    }

    async fn run(
        &self,
        owner_id: &str,
        request: &ToolInvocationRequest,
    ) -> Result<(Value, String), ToolError> {
        let tool = TaskTool::from_name(&request.name).ok_or_else(|| ToolError::UnknownTool {
            name: request.name.clone(),
        })?;

        let arguments = strip_identity(&request.arguments, request.turn_id);
        debug!(turn_id = %request.turn_id, tool = tool.name(), arguments = %arguments, "Executing tool");
        let command = TaskCommand::parse(tool, &arguments)?;
        let name = tool.name();

        match command {
            TaskCommand::Add {
                description,
                priority,
            } => {
                let task = self
                    .tasks
                    .create(owner_id, &description, priority)
                    .await
                    .map_err(|e| task_error(name, "", e))?;
                Ok((
                    task_value(&task),
                    format!("Added task: {} (Priority: {})", task.description, task.priority),
                ))
            }
            TaskCommand::List => {
                let tasks = self
                    .tasks
                    .list(owner_id)
                    .await
                    .map_err(|e| task_error(name, "", e))?;
                let summary = if tasks.is_empty() {
                    "No tasks found".to_string()
                } else {
                    format!("Found {} task(s)", tasks.len())
                };
                Ok((
                    json!({ "tasks": tasks.iter().map(task_value).collect::<Vec<_>>() }),
                    summary,
                ))
            }
            TaskCommand::Complete { task_id } => {
                let id = self.authorize_target(owner_id, name, &task_id).await?;
                let task = self
                    .tasks
                    .toggle_complete(owner_id, id)
                    .await
                    .map_err(|e| task_error(name, &task_id, e))?;
                let state = if task.completed { "completed" } else { "incomplete" };
                Ok((
                    task_value(&task),
                    format!("Task marked as {state}: {}", task.description),
                ))
            }
            TaskCommand::Delete { task_id } => {
                let id = self.authorize_target(owner_id, name, &task_id).await?;
                let task = self
                    .tasks
                    .get(owner_id, id)
                    .await
                    .map_err(|e| task_error(name, &task_id, e))?;
                self.tasks
                    .delete(owner_id, id)
                    .await
                    .map_err(|e| task_error(name, &task_id, e))?;
                Ok((
                    json!({ "deleted": task_value(&task) }),
                    format!("Deleted task: {}", task.description),
                ))
            }
            TaskCommand::Update { task_id, update } => {
                let id = self.authorize_target(owner_id, name, &task_id).await?;
                let task = self
                    .tasks
                    .update(owner_id, id, update)
                    .await
                    .map_err(|e| task_error(name, &task_id, e))?;
                Ok((
                    task_value(&task),
                    format!("Updated task: {} (Priority: {})", task.description, task.priority),
                ))
            }
        }
    }

    /// Resolve `raw_id` to a task the owner holds. Malformed, missing and
    /// foreign ids all produce the same `TaskNotFound`.
    async fn authorize_target(
        &self,
        owner_id: &str,
        name: &str,
        raw_id: &str,
    ) -> Result<Uuid, ToolError> {
        let not_found = || ToolError::TaskNotFound {
            name: name.to_string(),
            task_id: raw_id.to_string(),
        };

        let id = Uuid::parse_str(raw_id).map_err(|_| not_found())?;
        match self
            .tasks
            .owner_of(id)
            .await
            .map_err(|e| task_error(name, raw_id, e))?
        {
            Some(owner) if owner == owner_id => Ok(id),
            Some(_) => {
                warn!(owner_id, task_id = raw_id, tool = name, "Tool targeted a task of another user");
                Err(not_found())
            }
            None => Err(not_found()),
        }
    }
}

fn task_error(name: &str, task_id: &str, err: TaskError) -> ToolError {
    match err {
        TaskError::NotFound { .. } => ToolError::TaskNotFound {
            name: name.to_string(),
            task_id: task_id.to_string(),
        },
        TaskError::Invalid(reason) => ToolError::InvalidParameters {
            name: name.to_string(),
            reason,
        },
        TaskError::Database(e) => ToolError::ExecutionFailed {
            name: name.to_string(),
            reason: e.to_string(),
        },
    }
}

fn strip_identity(arguments: &Value, turn_id: Uuid) -> Value {
    let Value::Object(map) = arguments else {
        return arguments.clone();
    };
    let mut map = map.clone();
    for key in IDENTITY_KEYS {
        if map.remove(*key).is_some() {
            debug!(%turn_id, key = *key, "Ignoring identity claim in tool arguments");
        }
    }
    Value::Object(map)
}
