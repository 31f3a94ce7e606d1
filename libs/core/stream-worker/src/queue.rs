//! Queue handle: enqueue, delayed retries and bounded history for one job type.
//!
//! ```rust,ignore
//! let pool = QueuePool::new(Arc::new(SharedConnection::redis(Some(url))));
//! let receipt = pool.queue("outbound-send").add(&payload).await?;
//! ```

use crate::connection::SharedConnection;
use crate::error::StreamError;
use crate::history::JobHistory;
use crate::keys::{HistoryKind, QueueKeys};
use crate::options::JobOptions;
use crate::record::{JobRecord, RECORD_FIELD};
use crate::worker::StreamJob;
use chrono::Utc;
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Moves every due record from the delayed set back onto the live stream.
///
/// KEYS[1] delayed zset, KEYS[2] stream.
/// ARGV[1] now (ms), ARGV[2] batch limit, ARGV[3] field.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(due) do
  redis.call('ZREM', KEYS[1], member)
  redis.call('XADD', KEYS[2], '*', ARGV[3], member)
end
return #due
"#;

/// `XPENDING key group` summary: count, lowest id, highest id, per-consumer counts.
type PendingSummary = (u64, Option<String>, Option<String>, Option<Vec<(String, String)>>);

static PROMOTE: LazyLock<redis::Script> = LazyLock::new(|| redis::Script::new(PROMOTE_SCRIPT));

/// Receipt for a durably enqueued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueuedJob {
    pub job_id: Uuid,
    pub queue: String,
    pub stream_id: String,
}

/// Point-in-time counters for a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Entries on the live stream (waiting or in progress)
    pub live: u64,
    /// Delivered but not yet acknowledged
    pub pending: u64,
    /// Waiting out a retry backoff
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Durable queue for one job type, sharing the process-wide connection.
pub struct StreamQueue {
    name: String,
    keys: QueueKeys,
    options: JobOptions,
    connection: Arc<SharedConnection>,
}

impl StreamQueue {
    pub fn new(
        name: impl Into<String>,
        prefix: &str,
        options: JobOptions,
        connection: Arc<SharedConnection>,
    ) -> Self {
        let name = name.into();
        Self {
            keys: QueueKeys::new(prefix, &name),
            name,
            options,
            connection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn connection(&self) -> &Arc<SharedConnection> {
        &self.connection
    }

    pub fn history(&self) -> JobHistory<'_> {
        JobHistory::new(self)
    }

    pub(crate) async fn conn(&self) -> Result<ConnectionManager, StreamError> {
        self.connection.get().await
    }

    /// Add a job with this queue's default options.
    pub async fn add<J: StreamJob>(&self, job: &J) -> Result<EnqueuedJob, StreamError> {
        let record = JobRecord::new(
            &self.name,
            serde_json::to_value(job)?,
            &self.options,
            job.idempotency_key(),
        );
        let stream_id = self.push(&record).await?;

        Ok(EnqueuedJob {
            job_id: record.id,
            queue: self.name.clone(),
            stream_id,
        })
    }

    /// Append a record to the live stream.
    ///
    /// The live stream is never trimmed: acknowledged entries are deleted, so
    /// everything on it is still waiting or in progress.
    pub async fn push(&self, record: &JobRecord) -> Result<String, StreamError> {
        let mut conn = self.conn().await?;

        let stream_id: String = live_append(&self.keys.stream, &record.to_json()?)
            .query_async(&mut conn)
            .await?;

        debug!(
            queue = %self.name,
            job_id = %record.id,
            stream_id = %stream_id,
            "Enqueued job"
        );

        Ok(stream_id)
    }

    /// Park a record until `delay` has elapsed.
    pub async fn schedule_retry(
        &self,
        record: &JobRecord,
        delay: Duration,
    ) -> Result<(), StreamError> {
        let mut conn = self.conn().await?;
        let due_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let _: i64 = redis::cmd("ZADD")
            .arg(&self.keys.delayed)
            .arg(due_at)
            .arg(record.to_json()?)
            .query_async(&mut conn)
            .await?;

        debug!(
            queue = %self.name,
            job_id = %record.id,
            attempt = record.current_attempt(),
            delay_ms = delay.as_millis() as u64,
            "Scheduled retry"
        );

        Ok(())
    }

    /// Move due delayed records back onto the live stream. Atomic per call.
    pub async fn promote_due(&self, limit: usize) -> Result<usize, StreamError> {
        let mut conn = self.conn().await?;

        let promoted: usize = PROMOTE
            .key(&self.keys.delayed)
            .key(&self.keys.stream)
            .arg(Utc::now().timestamp_millis())
            .arg(limit)
            .arg(RECORD_FIELD)
            .invoke_async(&mut conn)
            .await?;

        if promoted > 0 {
            debug!(queue = %self.name, promoted, "Promoted delayed jobs");
        }

        Ok(promoted)
    }

    /// Append a finished record to a history stream, trimmed to its retention bound.
    pub async fn record_history(
        &self,
        kind: HistoryKind,
        record: &JobRecord,
    ) -> Result<(), StreamError> {
        let keep = match kind {
            HistoryKind::Completed => self.options.keep_completed,
            HistoryKind::Failed => self.options.keep_failed,
        };
        if keep == 0 {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        let _: String = redis::cmd("XADD")
            .arg(self.keys.history(kind))
            .arg("MAXLEN")
            .arg(keep)
            .arg("*")
            .arg(RECORD_FIELD)
            .arg(record.finished().to_json()?)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    pub async fn counts(&self) -> Result<QueueCounts, StreamError> {
        let mut conn = self.conn().await?;

        let (live, delayed, completed, failed): (u64, u64, u64, u64) = redis::pipe()
            .cmd("XLEN")
            .arg(&self.keys.stream)
            .cmd("ZCARD")
            .arg(&self.keys.delayed)
            .cmd("XLEN")
            .arg(&self.keys.completed)
            .cmd("XLEN")
            .arg(&self.keys.failed)
            .query_async(&mut conn)
            .await?;

        // NOGROUP before the first worker starts
        let pending: redis::RedisResult<PendingSummary> = redis::cmd("XPENDING")
            .arg(&self.keys.stream)
            .arg(&self.keys.group)
            .query_async(&mut conn)
            .await;

        Ok(QueueCounts {
            live,
            pending: pending.map(|(count, ..)| count).unwrap_or(0),
            delayed,
            completed,
            failed,
        })
    }
}

fn live_append(stream: &str, record: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream).arg("*").arg(RECORD_FIELD).arg(record);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DEFAULT_PREFIX;

    #[test]
    fn test_queue_uses_prefixed_keys() {
        let connection = Arc::new(SharedConnection::redis(None));
        let queue = StreamQueue::new(
            "inbound-process",
            DEFAULT_PREFIX,
            JobOptions::default(),
            connection,
        );

        assert_eq!(queue.name(), "inbound-process");
        assert_eq!(queue.keys().stream, "jobs:inbound-process");
        assert_eq!(queue.options().attempts, 3);
    }

    #[tokio::test]
    async fn test_add_without_backend_is_config_error() {
        let connection = Arc::new(SharedConnection::redis(None));
        let queue =
            StreamQueue::new("file-transfer", DEFAULT_PREFIX, JobOptions::default(), connection);
        let record = JobRecord::new("file-transfer", serde_json::json!({}), queue.options(), None);

        let err = queue.push(&record).await.unwrap_err();
        assert!(matches!(err, StreamError::Config(_)));
    }

    #[test]
    fn test_live_stream_is_never_trimmed() {
        let packed = live_append("jobs:outbound-send", "{}").get_packed_command();
        let packed = String::from_utf8_lossy(&packed);

        assert!(packed.contains("jobs:outbound-send"));
        assert!(!packed.contains("MAXLEN"));
        assert!(!PROMOTE_SCRIPT.contains("MAXLEN"));
    }
}
