//! Owner-scoped task operations.
//!
//! Every method takes the acting owner explicitly. A task that exists but
//! belongs to someone else is reported exactly like a missing one.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::TaskError;
use crate::store::Database;
use crate::tasks::model::{Priority, Task, TaskUpdate};

#[derive(Clone)]
pub struct TaskService {
    db: Arc<dyn Database>,
}

impl TaskService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        owner_id: &str,
        description: &str,
        priority: Priority,
    ) -> Result<Task, TaskError> {
        let description = clean_description(description)?;
        let task = Task::new(owner_id, description).with_priority(priority);
        self.db.create_task(&task).await?;
        info!(id = %task.id, owner_id, priority = %priority, "Task created");
        Ok(task)
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Task>, TaskError> {
        Ok(self.db.list_tasks(owner_id).await?)
    }

    pub async fn get(&self, owner_id: &str, task_id: Uuid) -> Result<Task, TaskError> {
        self.db
            .get_task(owner_id, task_id)
            .await?
            .ok_or_else(|| not_found(task_id))
    }

    /// Apply a partial update. An update with no fields returns the task unchanged.
    pub async fn update(
        &self,
        owner_id: &str,
        task_id: Uuid,
        update: TaskUpdate,
    ) -> Result<Task, TaskError> {
        let mut task = self.get(owner_id, task_id).await?;
        if update.is_empty() {
            return Ok(task);
        }

        if let Some(description) = update.description.as_deref() {
            task.description = clean_description(description)?.to_string();
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        task.updated_at = Utc::now().trunc_subsecs(6);

        if !self.db.update_task(&task).await? {
            return Err(not_found(task_id));
        }
        info!(id = %task_id, owner_id, "Task updated");
        Ok(task)
    }

    pub async fn delete(&self, owner_id: &str, task_id: Uuid) -> Result<(), TaskError> {
        if !self.db.delete_task(owner_id, task_id).await? {
            return Err(not_found(task_id));
        }
        info!(id = %task_id, owner_id, "Task deleted");
        Ok(())
    }

    /// Complete an open task or reopen a completed one.
    pub async fn toggle_complete(&self, owner_id: &str, task_id: Uuid) -> Result<Task, TaskError> {
        let task = self
            .db
            .toggle_task(owner_id, task_id, Utc::now())
            .await?
            .ok_or_else(|| not_found(task_id))?;
        info!(id = %task_id, owner_id, completed = task.completed, "Task completion toggled");
        Ok(task)
    }

    /// Owner of a task regardless of who is asking. Only for ownership checks;
    /// callers must never return the task itself to a non-owner.
    pub async fn owner_of(&self, task_id: Uuid) -> Result<Option<String>, TaskError> {
        Ok(self.db.find_task(task_id).await?.map(|t| t.user_id))
    }
}

fn not_found(task_id: Uuid) -> TaskError {
    TaskError::NotFound {
        id: task_id.to_string(),
    }
}

fn clean_description(raw: &str) -> Result<&str, TaskError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TaskError::Invalid(
            "Description cannot be empty or whitespace-only".to_string(),
        ));
    }
    Ok(trimmed)
}
