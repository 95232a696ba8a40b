//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::chat::model::{ConversationMessage, Sender};
use crate::error::DatabaseError;
use crate::tasks::model::Task;

/// Backend-agnostic database trait covering conversation messages and tasks.
///
/// Every method is a single statement, so each call is atomic and reads see
/// a consistent snapshot as of statement start.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Conversation messages ───────────────────────────────────────

    /// Append a message. The server assigns the id and a timestamp that is
    /// never earlier than the user's previous message.
    async fn append_message(
        &self,
        user_id: &str,
        content: &str,
        sender: Sender,
    ) -> Result<ConversationMessage, DatabaseError>;

    /// Oldest first, ties broken by insertion order.
    async fn list_messages(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationMessage>, DatabaseError>;

    /// The most recent `count` messages, returned oldest first.
    async fn recent_messages(
        &self,
        user_id: &str,
        count: u32,
    ) -> Result<Vec<ConversationMessage>, DatabaseError>;

    async fn count_messages(&self, user_id: &str) -> Result<u64, DatabaseError>;

    /// Remove every message of a user. Returns the number removed.
    async fn delete_messages(&self, user_id: &str) -> Result<u64, DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Owner-scoped lookup.
    async fn get_task(&self, user_id: &str, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Unscoped lookup, used only to check ownership before acting.
    async fn find_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Tasks of one user in creation order.
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>, DatabaseError>;

    /// Persist description/priority/completed of an existing task.
    /// Returns false when no row matched `(id, user_id)`.
    async fn update_task(&self, task: &Task) -> Result<bool, DatabaseError>;

    /// Flip `completed` and return the new row.
    async fn toggle_task(
        &self,
        user_id: &str,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, DatabaseError>;

    async fn delete_task(&self, user_id: &str, id: Uuid) -> Result<bool, DatabaseError>;
}
