//! Write-then-reraise handling of job failures.

use crate::store::{JobStore, StoreResult};
use std::future::Future;
use std::sync::Arc;
use tracing::error;

/// Records a failure in the store and hands the original result back.
///
/// A failing write is logged and dropped so it can never replace the
/// handler's own error.
#[derive(Clone)]
pub struct FailureRecorder {
    store: Arc<dyn JobStore>,
}

impl FailureRecorder {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// On `Err`, run `write` with the store and the rendered error chain.
    pub async fn capture<T, F, Fut>(&self, result: eyre::Result<T>, write: F) -> eyre::Result<T>
    where
        F: FnOnce(Arc<dyn JobStore>, String) -> Fut,
        Fut: Future<Output = StoreResult<()>>,
    {
        if let Err(report) = &result {
            let message = format!("{:#}", report);
            if let Err(e) = write(self.store.clone(), message).await {
                error!(error = %e, job_error = %report, "Failed to record job failure");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockJobStore, StoreError};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_success_writes_nothing() {
        let mut store = MockJobStore::new();
        store.expect_mark_message_failed().never();

        let recorder = FailureRecorder::new(Arc::new(store));
        let result = recorder
            .capture(Ok(5), |store, message| async move {
                store.mark_message_failed(Uuid::nil(), &message).await
            })
            .await;

        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_failure_is_written_then_returned() {
        let mut store = MockJobStore::new();
        store
            .expect_mark_message_failed()
            .withf(|_, reason| reason.to_string() == "send failed: 403 Forbidden")
            .times(1)
            .returning(|_, _| Ok(()));

        let recorder = FailureRecorder::new(Arc::new(store));
        let failed: eyre::Result<()> =
            Err(eyre::eyre!("403 Forbidden").wrap_err("send failed"));

        let err = recorder
            .capture(failed, |store, message| async move {
                store.mark_message_failed(Uuid::nil(), &message).await
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "send failed");
    }

    #[tokio::test]
    async fn test_store_failure_never_hides_handler_error() {
        let mut store = MockJobStore::new();
        store
            .expect_mark_message_failed()
            .times(1)
            .returning(|_, _| Err(StoreError::Unavailable("db down".into())));

        let recorder = FailureRecorder::new(Arc::new(store));
        let err = recorder
            .capture(
                Err::<(), _>(eyre::eyre!("provider timeout")),
                |store, message| async move {
                    store.mark_message_failed(Uuid::nil(), &message).await
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "provider timeout");
    }
}
