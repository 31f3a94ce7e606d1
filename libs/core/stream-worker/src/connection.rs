//! Process-scoped, lazily opened backend connection.
//!
//! Construction is serialized by an async mutex: callers racing on first use
//! wait for the one in-flight connect and then share its result. A failed
//! connect leaves the slot empty so the next caller tries again. After
//! [`SharedConnection::close`] every call fails with [`StreamError::Closed`].

use crate::error::StreamError;
use database::common::RetryConfig;
use futures::future::{BoxFuture, FutureExt};
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Opens a connection for a URL.
pub type Connector<C> =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<C, StreamError>> + Send + Sync>;

enum Slot<C> {
    Idle,
    Open(C),
    Closed,
}

/// The single shared connection handle used by queues and workers.
pub struct SharedConnection<C = ConnectionManager> {
    url: Option<String>,
    connector: Connector<C>,
    slot: Mutex<Slot<C>>,
    opened: AtomicUsize,
}

impl SharedConnection<ConnectionManager> {
    /// Redis connection verified with `PING`, no connect retries.
    ///
    /// Suited to the dispatch path, where a dead backend should surface
    /// quickly so the caller can fall back.
    pub fn redis(url: Option<String>) -> Self {
        Self::with_connector(
            url,
            Arc::new(|url: String| {
                async move {
                    database::redis::connect(&url)
                        .await
                        .map_err(StreamError::from)
                }
                .boxed()
            }),
        )
    }

    /// Redis connection with startup retries, for worker processes.
    pub fn redis_with_retry(url: Option<String>, retry: RetryConfig) -> Self {
        Self::with_connector(
            url,
            Arc::new(move |url: String| {
                let retry = retry.clone();
                async move {
                    database::redis::connect_with_retry(&url, Some(retry))
                        .await
                        .map_err(StreamError::from)
                }
                .boxed()
            }),
        )
    }
}

impl<C: Clone + Send + 'static> SharedConnection<C> {
    pub fn with_connector(url: Option<String>, connector: Connector<C>) -> Self {
        Self {
            url: url.filter(|u| !u.trim().is_empty()),
            connector,
            slot: Mutex::new(Slot::Idle),
            opened: AtomicUsize::new(0),
        }
    }

    /// Whether a backend target was supplied.
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Return the shared connection, opening it on first use.
    pub async fn get(&self) -> Result<C, StreamError> {
        let mut slot = self.slot.lock().await;

        match &*slot {
            Slot::Open(conn) => return Ok(conn.clone()),
            Slot::Closed => return Err(StreamError::Closed),
            Slot::Idle => {}
        }

        let url = self.url.clone().ok_or_else(|| {
            StreamError::Config("queue backend URL is not configured".to_string())
        })?;

        let conn = (self.connector)(url).await?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        *slot = Slot::Open(conn.clone());

        info!("Shared queue connection opened");
        Ok(conn)
    }

    /// Release the connection. Returns `false` if it was already closed.
    pub async fn close(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Closed => {
                debug!("Shared queue connection already closed");
                false
            }
            Slot::Open(conn) => {
                drop(conn);
                info!("Shared queue connection closed");
                true
            }
            Slot::Idle => true,
        }
    }

    pub async fn is_closed(&self) -> bool {
        matches!(*self.slot.lock().await, Slot::Closed)
    }

    /// Number of connections constructed so far (at most one while open).
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Connector handing out numbered fake connections after a short delay.
    fn counting_connector(calls: Arc<AtomicUsize>) -> Connector<usize> {
        Arc::new(move |_url: String| {
            let calls = calls.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, StreamError>(calls.fetch_add(1, Ordering::SeqCst) + 1)
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_missing_url_fails_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared =
            SharedConnection::with_connector(Some("  ".into()), counting_connector(calls.clone()));

        assert!(!shared.is_configured());
        assert!(matches!(shared.get().await, Err(StreamError::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = SharedConnection::with_connector(
            Some("redis://x".into()),
            counting_connector(calls.clone()),
        );

        assert_eq!(shared.get().await.unwrap(), 1);
        assert_eq!(shared.get().await.unwrap(), 1);
        assert_eq!(shared.opened_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_converges() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(SharedConnection::with_connector(
            Some("redis://x".into()),
            counting_connector(calls.clone()),
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let shared = shared.clone();
                tokio::spawn(async move { shared.get().await.unwrap() })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried_on_next_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let connector: Connector<u8> = Arc::new(move |_url: String| {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StreamError::Internal("refused".into()))
                } else {
                    Ok(7u8)
                }
            }
            .boxed()
        });
        let shared = SharedConnection::with_connector(Some("redis://x".into()), connector);

        assert!(shared.get().await.is_err());
        assert_eq!(shared.get().await.unwrap(), 7);
        assert_eq!(shared.opened_count(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared =
            SharedConnection::with_connector(Some("redis://x".into()), counting_connector(calls));

        shared.get().await.unwrap();
        assert!(shared.close().await);
        assert!(!shared.close().await);
        assert!(shared.is_closed().await);
        assert!(matches!(shared.get().await, Err(StreamError::Closed)));
    }
}
