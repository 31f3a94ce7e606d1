//! Prometheus metrics for stream workers
//!
//! Provides observability into worker throughput, retries and failures.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ErrorCategory;
use crate::queue::QueueCounts;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. If another recorder
/// is already installed the failure is logged and metrics stay unrendered.
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_ok() {
                info!("Prometheus metrics initialized");
            }
        }
        Err(e) => warn!(error = %e, "Failed to install Prometheus recorder"),
    }
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Per-queue worker metrics
#[derive(Clone)]
pub struct StreamMetrics {
    queue: String,
    processor: String,
}

impl StreamMetrics {
    pub fn new(queue: impl Into<String>, processor: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            processor: processor.into(),
        }
    }

    /// Record a job being received
    pub fn job_received(&self) {
        counter!(
            "job_worker_jobs_received_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(1);
    }

    /// Record a job completing
    pub fn job_completed(&self, duration: Duration) {
        counter!(
            "job_worker_jobs_processed_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "job_worker_job_duration_seconds",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed attempt
    pub fn job_failed(&self, category: ErrorCategory) {
        counter!(
            "job_worker_jobs_processed_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone(),
            "status" => "failed"
        )
        .increment(1);

        counter!(
            "job_worker_job_errors_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone(),
            "category" => category.as_str()
        )
        .increment(1);
    }

    pub fn job_retried(&self) {
        counter!(
            "job_worker_jobs_retried_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(1);
    }

    /// Record a job landing in the failed history
    pub fn job_exhausted(&self) {
        counter!(
            "job_worker_jobs_failed_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(1);
    }

    pub fn job_timed_out(&self) {
        counter!(
            "job_worker_jobs_timed_out_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(1);
    }

    /// Record message being claimed from another consumer
    pub fn message_claimed(&self, count: usize) {
        counter!(
            "job_worker_messages_claimed_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(count as u64);
    }

    /// Update queue depth gauges
    pub fn queue_counts(&self, counts: &QueueCounts) {
        gauge!("job_worker_queue_live", "queue" => self.queue.clone()).set(counts.live as f64);
        gauge!("job_worker_queue_pending", "queue" => self.queue.clone())
            .set(counts.pending as f64);
        gauge!("job_worker_queue_delayed", "queue" => self.queue.clone())
            .set(counts.delayed as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = StreamMetrics::new("outbound-send", "outbound_send");
        assert_eq!(metrics.queue, "outbound-send");
        assert_eq!(metrics.processor, "outbound_send");
    }
}
