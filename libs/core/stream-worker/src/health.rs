//! Health check and queue admin handlers for job workers.
//!
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Queue monitoring (`/queues`, `/queues/{name}`)
//! - History admin (`/admin/queues/{name}/{completed|failed}`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::StreamError;
use crate::keys::HistoryKind;
use crate::metrics;
use crate::pool::QueuePool;

type ApiError = (StatusCode, Json<Value>);

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub pool: Arc<QueuePool>,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(
        pool: Arc<QueuePool>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: String,
}

fn internal_error(e: StreamError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Ready once the shared connection is open and answers `PING`.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let not_ready = |detail: String| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "redis": detail }
            })),
        )
    };

    let mut conn = state
        .pool
        .connection()
        .get()
        .await
        .map_err(|e| not_ready(format!("error: {}", e)))?;

    database::redis::check_health(&mut conn)
        .await
        .map_err(|e| not_ready(format!("error: {}", e)))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "checks": { "redis": "ok" }
        })),
    ))
}

/// Names of the queues this process knows about.
///
/// `GET /queues`
pub async fn queues_handler(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({ "queues": state.pool.queue_names() }))
}

/// Live, pending, delayed and history counts for one queue.
///
/// `GET /queues/{name}`
pub async fn queue_counts_handler(
    State(state): State<HealthState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = known_queue(&state, &name)?;
    let counts = queue.counts().await.map_err(internal_error)?;

    Ok(Json(json!({ "queue": name, "counts": counts })))
}

/// Query parameters for history listing.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Maximum entries to return (default: 20, max: 200)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// Most recent history entries, newest first.
///
/// `GET /admin/queues/{name}/{kind}?limit=20`
pub async fn history_list_handler(
    State(state): State<HealthState>,
    Path((name, kind)): Path<(String, HistoryKind)>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = known_queue(&state, &name)?;
    let limit = params.limit.min(200);

    let entries = queue
        .history()
        .list(kind, limit)
        .await
        .map_err(internal_error)?;

    Ok(Json(json!({
        "queue": name,
        "history": kind,
        "count": entries.len(),
        "entries": entries,
    })))
}

/// Drop one history stream.
///
/// `DELETE /admin/queues/{name}/{kind}`
pub async fn history_purge_handler(
    State(state): State<HealthState>,
    Path((name, kind)): Path<(String, HistoryKind)>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = known_queue(&state, &name)?;
    let purged = queue.history().purge(kind).await.map_err(internal_error)?;

    Ok(Json(json!({
        "success": true,
        "queue": name,
        "history": kind,
        "purged_count": purged,
    })))
}

/// Re-enqueue one failed job with a fresh attempt budget.
///
/// `POST /admin/queues/{name}/failed/{entry_id}/retry`
pub async fn failed_retry_handler(
    State(state): State<HealthState>,
    Path((name, entry_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = known_queue(&state, &name)?;

    match queue.history().retry_failed(&entry_id).await {
        Ok(Some(enqueued)) => Ok(Json(json!({ "success": true, "job": enqueued }))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Entry not found in failed history",
                "entry_id": entry_id
            })),
        )),
        Err(e) => Err(internal_error(e)),
    }
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

fn known_queue(
    state: &HealthState,
    name: &str,
) -> Result<Arc<crate::queue::StreamQueue>, ApiError> {
    if !state.pool.queue_names().iter().any(|q| q == name) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Unknown queue", "queue": name })),
        ));
    }
    Ok(state.pool.queue(name))
}

/// Create a standard health router.
///
/// - `/health`, `/healthz` - Liveness probe
/// - `/ready`, `/readyz` - Readiness probe
/// - `/queues`, `/queues/{name}` - Queue monitoring
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/queues", get(queues_handler))
        .route("/queues/{name}", get(queue_counts_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health router plus history admin endpoints.
///
/// - `GET /admin/queues/{name}/{kind}` - List history entries
/// - `DELETE /admin/queues/{name}/{kind}` - Purge a history stream
/// - `POST /admin/queues/{name}/failed/{entry_id}/retry` - Re-run a failed job
pub fn full_admin_router(state: HealthState) -> axum::Router {
    use axum::routing::{get, post};

    let admin = axum::Router::new()
        .route(
            "/admin/queues/{name}/{kind}",
            get(history_list_handler).delete(history_purge_handler),
        )
        .route(
            "/admin/queues/{name}/failed/{entry_id}/retry",
            post(failed_retry_handler),
        )
        .with_state(state.clone());

    health_router(state).merge(admin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SharedConnection;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> HealthState {
        let pool = QueuePool::new(Arc::new(SharedConnection::redis(None)));
        pool.queue("outbound-send");
        HealthState::new(Arc::new(pool), "jobs-worker", "0.1.0")
    }

    async fn get(router: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = get(health_router(state()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["name"], "jobs-worker");
    }

    #[tokio::test]
    async fn test_ready_without_backend_is_unavailable() {
        let (status, body) = get(health_router(state()), "/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
    }

    #[tokio::test]
    async fn test_queue_listing() {
        let (status, body) = get(health_router(state()), "/queues").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queues"], json!(["outbound-send"]));
    }

    #[tokio::test]
    async fn test_unknown_queue_is_not_found() {
        let (status, _) = get(full_admin_router(state()), "/admin/queues/nope/failed").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
