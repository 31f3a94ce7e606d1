//! Worker configuration
//!
//! `WorkerConfig` controls how one worker reads from, and processes, a queue.

use crate::queue::StreamQueue;
use std::time::Duration;
use uuid::Uuid;

/// Idle time past the job timeout before an entry counts as abandoned.
pub const CLAIM_MARGIN: Duration = Duration::from_secs(30);

const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Shortest claim timeout that cannot take a job from a live attempt.
fn min_claim_timeout_ms(job_timeout: Duration) -> u64 {
    (job_timeout + CLAIM_MARGIN).as_millis() as u64
}

/// Configuration for a stream worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis stream name
    pub stream_name: String,

    /// Consumer group name
    pub consumer_group: String,

    /// Unique consumer ID (auto-generated if not provided)
    pub consumer_id: String,

    /// Poll interval in milliseconds when no messages are available
    pub poll_interval_ms: u64,

    /// Batch size for reading messages
    pub batch_size: usize,

    /// Blocking read timeout in milliseconds (None = polling).
    ///
    /// A blocking read holds the multiplexed connection, stalling every other
    /// queue sharing it, so polling is the default.
    pub blocking_timeout_ms: Option<u64>,

    /// Maximum jobs processed at once
    pub max_concurrent_jobs: usize,

    /// Idle time in milliseconds before another consumer's entry is claimed.
    /// Never below `job_timeout + CLAIM_MARGIN`.
    pub claim_timeout_ms: u64,

    /// How often to look for abandoned entries
    pub claim_interval: Duration,

    /// Upper bound on a single attempt
    pub job_timeout: Duration,

    /// Delayed retries promoted per loop iteration
    pub promote_batch: usize,
}

impl WorkerConfig {
    /// Config for a worker on the given queue
    pub fn for_queue(queue: &StreamQueue) -> Self {
        Self::new(&queue.keys().stream, &queue.keys().group)
    }

    /// Create a new WorkerConfig with explicit values
    pub fn new(stream_name: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            consumer_group: consumer_group.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval_ms: 250,
            batch_size: 10,
            blocking_timeout_ms: None,
            max_concurrent_jobs: 4,
            claim_timeout_ms: min_claim_timeout_ms(DEFAULT_JOB_TIMEOUT),
            claim_interval: Duration::from_secs(30),
            job_timeout: DEFAULT_JOB_TIMEOUT,
            promote_batch: 100,
        }
    }

    /// Set the consumer ID
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the blocking timeout (None for polling)
    pub fn with_blocking(mut self, timeout_ms: Option<u64>) -> Self {
        self.blocking_timeout_ms = timeout_ms;
        self
    }

    /// Set the maximum concurrent jobs
    pub fn with_max_concurrent_jobs(mut self, count: usize) -> Self {
        self.max_concurrent_jobs = count.max(1);
        self
    }

    /// Set the claim timeout for abandoned messages, raised to outlast the job timeout
    pub fn with_claim_timeout_ms(mut self, timeout: u64) -> Self {
        self.claim_timeout_ms = timeout.max(min_claim_timeout_ms(self.job_timeout));
        self
    }

    /// Set the attempt bound, raising the claim timeout along with it
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self.claim_timeout_ms = self.claim_timeout_ms.max(min_claim_timeout_ms(timeout));
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("jobs:default", "default_workers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SharedConnection;
    use crate::keys::DEFAULT_PREFIX;
    use crate::options::JobOptions;
    use std::sync::Arc;

    #[test]
    fn test_for_queue() {
        let queue = StreamQueue::new(
            "outbound-send",
            DEFAULT_PREFIX,
            JobOptions::default(),
            Arc::new(SharedConnection::redis(None)),
        );
        let config = WorkerConfig::for_queue(&queue);

        assert_eq!(config.stream_name, "jobs:outbound-send");
        assert_eq!(config.consumer_group, "outbound-send_workers");
        assert!(config.consumer_id.starts_with("worker-"));
        assert_eq!(config.blocking_timeout_ms, None);
        assert_eq!(config.job_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_pattern() {
        let config = WorkerConfig::new("my:stream", "my:group")
            .with_consumer_id("worker-1")
            .with_batch_size(20)
            .with_max_concurrent_jobs(0)
            .with_blocking(Some(10_000))
            .with_job_timeout(Duration::from_secs(5));

        assert_eq!(config.stream_name, "my:stream");
        assert_eq!(config.consumer_id, "worker-1");
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.blocking_timeout_ms, Some(10_000));
        assert_eq!(config.job_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_claim_timeout_outlasts_job_timeout() {
        let config = WorkerConfig::default();
        assert_eq!(config.claim_timeout_ms, 330_000);

        let config = WorkerConfig::default().with_job_timeout(Duration::from_secs(900));
        assert_eq!(config.claim_timeout_ms, 930_000);

        let config = WorkerConfig::default()
            .with_job_timeout(Duration::from_secs(10))
            .with_claim_timeout_ms(1_000);
        assert_eq!(config.claim_timeout_ms, 330_000);

        let config = WorkerConfig::default().with_claim_timeout_ms(3_600_000);
        assert_eq!(config.claim_timeout_ms, 3_600_000);
    }
}
