//! Tool catalogue: the fixed set of task operations advertised to the agent.
//!
//! The set is closed, so tools are an enum and dispatch is a `match`.
//! `TaskCommand::parse` checks invocation arguments against the same
//! declarations that `parameters_schema` advertises.

use serde_json::{Value, json};

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::tasks::model::{Priority, TaskUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskTool {
    AddTask,
    ListTasks,
    CompleteTask,
    DeleteTask,
    UpdateTask,
}

impl TaskTool {
    pub const ALL: [TaskTool; 5] = [
        TaskTool::AddTask,
        TaskTool::ListTasks,
        TaskTool::CompleteTask,
        TaskTool::DeleteTask,
        TaskTool::UpdateTask,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::AddTask => "add_task",
            Self::ListTasks => "list_tasks",
            Self::CompleteTask => "complete_task",
            Self::DeleteTask => "delete_task",
            Self::UpdateTask => "update_task",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::AddTask => {
                "Create a new task for the user. Extract a short, non-empty description \
                 of what needs to be done. Priority defaults to Medium."
            }
            Self::ListTasks => {
                "List all of the user's tasks with their ids, descriptions, priorities \
                 and completion status. Call this first to find the task_id needed by \
                 complete_task, delete_task and update_task."
            }
            Self::CompleteTask => {
                "Toggle a task's completion: marks an open task completed, or reopens a \
                 completed one."
            }
            Self::DeleteTask => "Permanently delete a task.",
            Self::UpdateTask => {
                "Change a task's description and/or priority. Fields that are omitted \
                 stay unchanged."
            }
        }
    }

    pub fn parameters_schema(&self) -> Value {
        let priority = json!({
            "type": "string",
            "enum": ["Low", "Medium", "High"],
            "description": "Task priority"
        });
        let task_id = json!({
            "type": "string",
            "description": "The id of the task, as returned by list_tasks"
        });

        match self {
            Self::AddTask => json!({
                "type": "object",
                "properties": {
                    "description": {
                        "type": "string",
                        "description": "What needs to be done"
                    },
                    "priority": priority
                },
                "required": ["description"]
            }),
            Self::ListTasks => json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            Self::CompleteTask | Self::DeleteTask => json!({
                "type": "object",
                "properties": { "task_id": task_id },
                "required": ["task_id"]
            }),
            Self::UpdateTask => json!({
                "type": "object",
                "properties": {
                    "task_id": task_id,
                    "description": {
                        "type": "string",
                        "description": "New description"
                    },
                    "priority": priority
                },
                "required": ["task_id"]
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Definitions for every catalogue entry, in catalogue order.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    TaskTool::ALL.iter().map(TaskTool::definition).collect()
}

/// A tool invocation whose arguments passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskCommand {
    Add {
        description: String,
        priority: Priority,
    },
    List,
    Complete {
        task_id: String,
    },
    Delete {
        task_id: String,
    },
    Update {
        task_id: String,
        update: TaskUpdate,
    },
}

impl TaskCommand {
    pub fn parse(tool: TaskTool, args: &Value) -> Result<Self, ToolError> {
        let name = tool.name();
        let empty = serde_json::Map::new();
        let args = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(invalid(name, "arguments must be a JSON object")),
        };

        match tool {
            TaskTool::AddTask => Ok(Self::Add {
                description: required_text(name, args, "description")?,
                priority: optional_priority(name, args)?.unwrap_or_default(),
            }),
            TaskTool::ListTasks => Ok(Self::List),
            TaskTool::CompleteTask => Ok(Self::Complete {
                task_id: required_text(name, args, "task_id")?,
            }),
            TaskTool::DeleteTask => Ok(Self::Delete {
                task_id: required_text(name, args, "task_id")?,
            }),
            TaskTool::UpdateTask => Ok(Self::Update {
                task_id: required_text(name, args, "task_id")?,
                update: TaskUpdate {
                    description: optional_text(name, args, "description")?,
                    priority: optional_priority(name, args)?,
                },
            }),
        }
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ToolError {
    ToolError::InvalidParameters {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn required_text(
    name: &str,
    args: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, ToolError> {
    optional_text(name, args, field)?.ok_or_else(|| invalid(name, format!("missing '{field}'")))
}

/// `None` when absent or null; blank strings are an error.
fn optional_text(
    name: &str,
    args: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<String>, ToolError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(invalid(name, format!("'{field}' cannot be empty")))
        }
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(invalid(name, format!("'{field}' must be a string"))),
    }
}

fn optional_priority(
    name: &str,
    args: &serde_json::Map<String, Value>,
) -> Result<Option<Priority>, ToolError> {
    match args.get("priority") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some).map_err(|e: String| invalid(name, e)),
        Some(_) => Err(invalid(name, "'priority' must be one of: Low, Medium, High")),
    }
}
