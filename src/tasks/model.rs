//! Task data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task priority. Serialized exactly as `Low`, `Medium`, `High`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Self::Low),
            "Medium" => Ok(Self::Medium),
            "High" => Ok(Self::High),
            other => Err(format!(
                "Invalid priority '{other}'. Must be one of: Low, Medium, High"
            )),
        }
    }
}

/// A single task owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Owner of this task.
    pub user_id: String,
    pub description: String,
    pub priority: Priority,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(user_id: &str, description: &str) -> Self {
        // Storage keeps microseconds; truncate so a fresh task equals its stored copy.
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            description: description.to_string(),
            priority: Priority::default(),
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Body of `POST /api/{user_id}/tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.priority.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_defaults() {
        let task = Task::new("user1", "Buy milk");
        assert_eq!(task.priority, Priority::Medium);
        assert!(!task.completed);
        assert_eq!(task.user_id, "user1");
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn priority_serde_is_capitalized() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"High\"");
        let parsed: Priority = serde_json::from_str("\"Low\"").unwrap();
        assert_eq!(parsed, Priority::Low);
        assert!(serde_json::from_str::<Priority>("\"urgent\"").is_err());
    }

    #[test]
    fn priority_from_str_is_exact() {
        assert_eq!("Medium".parse::<Priority>().unwrap(), Priority::Medium);
        assert!("medium".parse::<Priority>().is_err());
    }

    #[test]
    fn new_task_body_defaults_priority() {
        let body: NewTask = serde_json::from_str(r#"{"description":"walk dog"}"#).unwrap();
        assert_eq!(body.priority, Priority::Medium);
    }

    #[test]
    fn empty_update_detected() {
        let update: TaskUpdate = serde_json::from_str("{}").unwrap();
        assert!(update.is_empty());
        let update: TaskUpdate = serde_json::from_str(r#"{"priority":"High"}"#).unwrap();
        assert!(!update.is_empty());
    }
}
