//! Redis key layout for a queue.
//!
//! A queue named `q` under prefix `p` owns:
//! - `p:q` - live stream read by the consumer group `q_workers`
//! - `p:q:delayed` - sorted set of records waiting out their backoff
//! - `p:q:completed` / `p:q:failed` - bounded history streams

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Default key prefix for queue streams.
pub const DEFAULT_PREFIX: &str = "jobs";

/// Which history stream to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Completed,
    Failed,
}

/// Resolved key names for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub stream: String,
    pub group: String,
    pub delayed: String,
    pub completed: String,
    pub failed: String,
}

impl QueueKeys {
    pub fn new(prefix: &str, queue: &str) -> Self {
        let stream = format!("{}:{}", prefix, queue);
        Self {
            group: format!("{}_workers", queue),
            delayed: format!("{}:delayed", stream),
            completed: format!("{}:completed", stream),
            failed: format!("{}:failed", stream),
            stream,
        }
    }

    pub fn history(&self, kind: HistoryKind) -> &str {
        match kind {
            HistoryKind::Completed => &self.completed,
            HistoryKind::Failed => &self.failed,
        }
    }
}
