//! The durable job record stored in queue streams.

use crate::error::StreamError;
use crate::options::{Backoff, JobOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Field name holding the serialized record in every stream entry.
pub const RECORD_FIELD: &str = "job";

/// A job as persisted by the backend: payload plus retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable across retries
    pub id: Uuid,
    /// Queue (job type) name
    pub name: String,
    /// Serialized payload
    pub data: serde_json::Value,
    /// Failed attempts so far
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Handler-level deduplication hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(
        name: impl Into<String>,
        data: serde_json::Value,
        options: &JobOptions,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            data,
            attempts_made: 0,
            max_attempts: options.attempts,
            backoff: options.backoff,
            idempotency_key,
            enqueued_at: Utc::now(),
            last_error: None,
            finished_at: None,
        }
    }

    /// 1-based number of the attempt about to run.
    pub fn current_attempt(&self) -> u32 {
        self.attempts_made + 1
    }

    /// Copy with one more failed attempt and its error.
    pub fn failed_attempt(&self, error: impl Into<String>) -> Self {
        Self {
            attempts_made: self.attempts_made + 1,
            last_error: Some(error.into()),
            ..self.clone()
        }
    }

    /// Copy stamped as finished, for the history streams.
    pub fn finished(&self) -> Self {
        Self {
            finished_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Copy with a fresh attempt budget, for manual re-runs of failed jobs.
    pub fn rerun(&self) -> Self {
        Self {
            attempts_made: 0,
            last_error: None,
            finished_at: None,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        Ok(serde_json::from_str(json)?)
    }
}
