//! Side-channel writes made when jobs finish or fail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One audit log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant_id: Uuid,
    /// Background jobs act on nobody's behalf
    pub actor_id: Option<Uuid>,
    pub entity: String,
    pub entity_id: String,
    pub action: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn system(
        tenant_id: Uuid,
        entity: impl Into<String>,
        entity_id: impl ToString,
        action: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id,
            actor_id: None,
            entity: entity.into(),
            entity_id: entity_id.to_string(),
            action: action.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Persistent store for job bookkeeping.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Stamp the processed time and clear any previous error.
    async fn mark_update_processed(&self, bot_id: Uuid, update_id: i64) -> StoreResult<()>;

    /// Stamp the processed time together with the error message.
    async fn mark_update_failed(&self, bot_id: Uuid, update_id: i64, error: &str)
        -> StoreResult<()>;

    async fn mark_message_failed(&self, message_id: Uuid, reason: &str) -> StoreResult<()>;

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()>;
}

/// Processing state of an inbound update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateState {
    pub processed_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageState {
    pub status: MessageStatus,
    pub failure_reason: Option<String>,
}

#[derive(Default)]
struct Tables {
    updates: HashMap<(Uuid, i64), UpdateState>,
    messages: HashMap<Uuid, MessageState>,
    audit: Vec<AuditEntry>,
}

/// In-process store for local development and tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn insert_queued_message(&self, message_id: Uuid) {
        self.tables().messages.insert(
            message_id,
            MessageState {
                status: MessageStatus::Queued,
                failure_reason: None,
            },
        );
    }

    pub fn update_state(&self, bot_id: Uuid, update_id: i64) -> Option<UpdateState> {
        self.tables().updates.get(&(bot_id, update_id)).cloned()
    }

    pub fn message_state(&self, message_id: Uuid) -> Option<MessageState> {
        self.tables().messages.get(&message_id).cloned()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.tables().audit.clone()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn mark_update_processed(&self, bot_id: Uuid, update_id: i64) -> StoreResult<()> {
        self.check_available()?;
        self.tables().updates.insert(
            (bot_id, update_id),
            UpdateState {
                processed_at: Utc::now(),
                error: None,
            },
        );
        Ok(())
    }

    async fn mark_update_failed(
        &self,
        bot_id: Uuid,
        update_id: i64,
        error: &str,
    ) -> StoreResult<()> {
        self.check_available()?;
        self.tables().updates.insert(
            (bot_id, update_id),
            UpdateState {
                processed_at: Utc::now(),
                error: Some(error.to_string()),
            },
        );
        Ok(())
    }

    async fn mark_message_failed(&self, message_id: Uuid, reason: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables();
        let message = tables
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "message",
                id: message_id.to_string(),
            })?;

        message.status = MessageStatus::Failed;
        message.failure_reason = Some(reason.to_string());
        Ok(())
    }

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        self.check_available()?;
        info!(
            target: "audit",
            tenant_id = %entry.tenant_id,
            entity = %entry.entity,
            entity_id = %entry.entity_id,
            action = %entry.action,
            "Audit entry recorded"
        );
        self.tables().audit.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_marking_overwrites() {
        let store = InMemoryJobStore::new();
        let bot_id = Uuid::now_v7();

        store.mark_update_failed(bot_id, 7, "timeout").await.unwrap();
        assert_eq!(
            store.update_state(bot_id, 7).unwrap().error.as_deref(),
            Some("timeout")
        );

        store.mark_update_processed(bot_id, 7).await.unwrap();
        assert!(store.update_state(bot_id, 7).unwrap().error.is_none());
    }

    #[tokio::test]
    async fn test_mark_unknown_message_fails() {
        let store = InMemoryJobStore::new();
        let err = store
            .mark_message_failed(Uuid::now_v7(), "blocked")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "message", .. }));
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_writes() {
        let store = InMemoryJobStore::new();
        store.set_unavailable(true);

        let entry = AuditEntry::system(Uuid::nil(), "message", "m1", "test", json!({}));
        assert!(matches!(
            store.append_audit(entry).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.audit_entries().is_empty());
    }
}
