//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! fixed-width RFC 3339 strings (microseconds, `Z` suffix) so that text
//! comparison in SQL matches chronological order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::chat::model::{ConversationMessage, Sender};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;
use crate::tasks::model::{Priority, Task};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str, field: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("{field} '{s}': {e}")))
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("{field} '{s}': {e}")))
}

const MESSAGE_COLUMNS: &str = "id, user_id, content, sender, created_at";

fn row_to_message(row: &libsql::Row) -> Result<ConversationMessage, DatabaseError> {
    let get = |idx: i32, field: &str| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("chat_messages.{field}: {e}")))
    };

    let id = parse_uuid(&get(0, "id")?, "chat_messages.id")?;
    let sender = get(3, "sender")?
        .parse::<Sender>()
        .map_err(DatabaseError::Serialization)?;

    Ok(ConversationMessage {
        id,
        user_id: get(1, "user_id")?,
        content: get(2, "content")?,
        sender,
        created_at: parse_ts(&get(4, "created_at")?, "chat_messages.created_at")?,
    })
}

const TASK_COLUMNS: &str = "id, user_id, description, priority, completed, created_at, updated_at";

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let get = |idx: i32, field: &str| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("tasks.{field}: {e}")))
    };

    let priority = get(3, "priority")?
        .parse::<Priority>()
        .map_err(DatabaseError::Serialization)?;
    let completed: i64 = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("tasks.completed: {e}")))?;

    Ok(Task {
        id: parse_uuid(&get(0, "id")?, "tasks.id")?,
        user_id: get(1, "user_id")?,
        description: get(2, "description")?,
        priority,
        completed: completed != 0,
        created_at: parse_ts(&get(5, "created_at")?, "tasks.created_at")?,
        updated_at: parse_ts(&get(6, "updated_at")?, "tasks.updated_at")?,
    })
}

async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    convert: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        out.push(convert(&row)?);
    }
    Ok(out)
}

async fn first_row<T>(
    mut rows: libsql::Rows,
    op: &str,
    convert: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Option<T>, DatabaseError> {
    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        Some(row) => convert(&row).map(Some),
        None => Ok(None),
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Conversation messages ───────────────────────────────────────

    async fn append_message(
        &self,
        user_id: &str,
        content: &str,
        sender: Sender,
    ) -> Result<ConversationMessage, DatabaseError> {
        let id = Uuid::new_v4();
        let now = format_ts(Utc::now());

        // One statement: the timestamp is clamped to the user's latest row, so
        // a wall clock stepping backwards cannot reorder history.
        let rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO chat_messages (id, user_id, content, sender, created_at)
                     VALUES (?1, ?2, ?3, ?4, MAX(?5, COALESCE(
                         (SELECT MAX(created_at) FROM chat_messages WHERE user_id = ?2), ?5)))
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                params![id.to_string(), user_id, content, sender.as_str(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_message: {e}")))?;

        let message = first_row(rows, "append_message", row_to_message)
            .await?
            .ok_or_else(|| DatabaseError::Query("append_message: no row returned".to_string()))?;

        debug!(id = %message.id, user_id, sender = %sender, "Message appended");
        Ok(message)
    }

    async fn list_messages(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationMessage>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM chat_messages
                     WHERE user_id = ?1
                     ORDER BY created_at ASC, seq ASC
                     LIMIT ?2 OFFSET ?3"
                ),
                params![user_id, i64::from(limit), i64::from(offset)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;

        collect_rows(rows, "list_messages", row_to_message).await
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        count: u32,
    ) -> Result<Vec<ConversationMessage>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM (
                         SELECT {MESSAGE_COLUMNS}, seq FROM chat_messages
                         WHERE user_id = ?1
                         ORDER BY created_at DESC, seq DESC
                         LIMIT ?2
                     ) ORDER BY created_at ASC, seq ASC"
                ),
                params![user_id, i64::from(count)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_messages: {e}")))?;

        collect_rows(rows, "recent_messages", row_to_message).await
    }

    async fn count_messages(&self, user_id: &str) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM chat_messages WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_messages: {e}")))?;

        let count: i64 = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count_messages: {e}")))?
        {
            Some(row) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("count_messages: {e}")))?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn delete_messages(&self, user_id: &str) -> Result<u64, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM chat_messages WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_messages: {e}")))?;
        info!(user_id, count, "Conversation erased");
        Ok(count)
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(&self, task: &Task) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO tasks (id, user_id, description, priority, completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    task.id.to_string(),
                    task.user_id.as_str(),
                    task.description.as_str(),
                    task.priority.as_str(),
                    i64::from(task.completed),
                    format_ts(task.created_at),
                    format_ts(task.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_task: {e}")))?;
        debug!(id = %task.id, user_id = %task.user_id, "Task created");
        Ok(())
    }

    async fn get_task(&self, user_id: &str, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
                params![id.to_string(), user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        first_row(rows, "get_task", row_to_task).await
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_task: {e}")))?;

        first_row(rows, "find_task", row_to_task).await
    }

    async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;

        collect_rows(rows, "list_tasks", row_to_task).await
    }

    async fn update_task(&self, task: &Task) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE tasks SET description = ?3, priority = ?4, completed = ?5, updated_at = ?6
                 WHERE id = ?1 AND user_id = ?2",
                params![
                    task.id.to_string(),
                    task.user_id.as_str(),
                    task.description.as_str(),
                    task.priority.as_str(),
                    i64::from(task.completed),
                    format_ts(task.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task: {e}")))?;
        Ok(count > 0)
    }

    async fn toggle_task(
        &self,
        user_id: &str,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE tasks SET completed = 1 - completed, updated_at = ?3
                     WHERE id = ?1 AND user_id = ?2
                     RETURNING {TASK_COLUMNS}"
                ),
                params![id.to_string(), user_id, format_ts(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("toggle_task: {e}")))?;

        first_row(rows, "toggle_task", row_to_task).await
    }

    async fn delete_task(&self, user_id: &str, id: Uuid) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task: {e}")))?;
        Ok(count > 0)
    }
}
