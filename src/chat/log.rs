//! Message log: durable, ordered, per-user conversation storage.

use std::sync::Arc;

use tracing::warn;

use crate::chat::model::{ConversationMessage, Sender};
use crate::error::ChatError;
use crate::store::Database;

pub const EMPTY_MESSAGE: &str = "Message cannot be empty";

/// Append-only view over the conversation table.
///
/// Reads that name a history owner also take the authenticated requester;
/// a mismatch is an authorization error rather than an empty result.
#[derive(Clone)]
pub struct MessageLog {
    db: Arc<dyn Database>,
}

impl MessageLog {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Trim and store one message. Whitespace-only content is rejected
    /// before anything is written.
    pub async fn append(
        &self,
        user_id: &str,
        content: &str,
        sender: Sender,
    ) -> Result<ConversationMessage, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation(EMPTY_MESSAGE.to_string()));
        }
        Ok(self.db.append_message(user_id, content, sender).await?)
    }

    /// A window of `owner`'s history, oldest first.
    pub async fn list(
        &self,
        requester: &str,
        owner: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationMessage>, ChatError> {
        ensure_owner(requester, owner)?;
        Ok(self.db.list_messages(owner, limit, offset).await?)
    }

    pub async fn count(&self, requester: &str, owner: &str) -> Result<u64, ChatError> {
        ensure_owner(requester, owner)?;
        Ok(self.db.count_messages(owner).await?)
    }

    /// The latest `count` messages of the acting user, oldest first.
    pub async fn recent(
        &self,
        user_id: &str,
        count: usize,
    ) -> Result<Vec<ConversationMessage>, ChatError> {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        Ok(self.db.recent_messages(user_id, count).await?)
    }

    /// Remove all of `owner`'s messages. Returns how many were removed.
    pub async fn erase_all(&self, requester: &str, owner: &str) -> Result<u64, ChatError> {
        ensure_owner(requester, owner)?;
        Ok(self.db.delete_messages(owner).await?)
    }
}

fn ensure_owner(requester: &str, owner: &str) -> Result<(), ChatError> {
    if requester != owner {
        warn!(requester, owner, "Rejected cross-user history access");
        return Err(ChatError::Authorization);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn test_log() -> MessageLog {
        MessageLog::new(Arc::new(LibSqlBackend::new_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn append_stores_trimmed_content() {
        let log = test_log().await;
        let msg = log.append("alice", "  hi there \n", Sender::User).await.unwrap();
        assert_eq!(msg.content, "hi there");
    }

    #[tokio::test]
    async fn append_rejects_whitespace() {
        let log = test_log().await;
        for raw in ["", "   ", "\n\t"] {
            let err = log.append("alice", raw, Sender::User).await.unwrap_err();
            assert!(matches!(err, ChatError::Validation(ref m) if m == EMPTY_MESSAGE));
        }
        assert_eq!(log.count("alice", "alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cross_user_reads_are_rejected() {
        let log = test_log().await;
        log.append("bob", "bob's secret", Sender::User).await.unwrap();

        assert!(matches!(
            log.list("alice", "bob", 50, 0).await.unwrap_err(),
            ChatError::Authorization
        ));
        assert!(matches!(
            log.count("alice", "bob").await.unwrap_err(),
            ChatError::Authorization
        ));
        assert!(matches!(
            log.erase_all("alice", "bob").await.unwrap_err(),
            ChatError::Authorization
        ));
        assert_eq!(log.count("bob", "bob").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn offset_past_end_is_empty() {
        let log = test_log().await;
        log.append("alice", "one", Sender::User).await.unwrap();
        assert!(log.list("alice", "alice", 10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_reads_forward_in_time() {
        let log = test_log().await;
        log.append("alice", "q1", Sender::User).await.unwrap();
        log.append("alice", "a1", Sender::Assistant).await.unwrap();
        log.append("alice", "q2", Sender::User).await.unwrap();

        let recent = log.recent("alice", 2).await.unwrap();
        let view: Vec<_> = recent.iter().map(|m| (m.sender, m.content.as_str())).collect();
        assert_eq!(view, vec![(Sender::Assistant, "a1"), (Sender::User, "q2")]);
    }

    #[tokio::test]
    async fn erase_all_clears_history() {
        let log = test_log().await;
        log.append("alice", "one", Sender::User).await.unwrap();
        log.append("alice", "two", Sender::Assistant).await.unwrap();
        assert_eq!(log.erase_all("alice", "alice").await.unwrap(), 2);
        assert!(log.list("alice", "alice", 10, 0).await.unwrap().is_empty());
    }
}
