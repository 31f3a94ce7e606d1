//! Jobs Worker Service
//!
//! A background worker that drains the durable job queues.
//!
//! ## Architecture
//!
//! ```text
//! Redis Streams ({prefix}:inbound-process | outbound-send | file-transfer)
//!   ↓ (Consumer Group per queue)
//! JobWorkers → StreamWorker<Payload, Processor> × 3
//!   ↓ (handler calls + bookkeeping writes)
//! HttpJobBridge → platform API callbacks
//! ```
//!
//! ## Features
//!
//! - Three attempts per job with exponential backoff
//! - Failed jobs kept in a history stream with a re-run endpoint
//! - Graceful shutdown: in-flight jobs finish, then the connection closes
//! - Health check endpoint for Kubernetes probes

pub mod bridge;

use axum::Router;
use core_config::{env_optional, env_parse, ConfigError, Environment, FromEnv};
use domain_jobs::{DispatchConfig, DispatchMode, Dispatcher, JobWorkers, WorkerSettings};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use stream_worker::{full_admin_router, metrics, HealthState, QueuePool, SharedConnection};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

pub use bridge::{BridgeConfig, HttpJobBridge};

/// Start the health and admin HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Queue monitoring: `/queues`, `/queues/{name}`
/// - Prometheus metrics: `/metrics`
/// - History admin: `/admin/queues/*`
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app: Router = full_admin_router(health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health and admin server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Health server port: `JOB_WORKER_HEALTH_PORT`, then `HEALTH_PORT`, then 8083.
///
/// A set but malformed value is an error.
fn health_port() -> Result<u16, ConfigError> {
    if env_optional("JOB_WORKER_HEALTH_PORT").is_some() {
        return env_parse("JOB_WORKER_HEALTH_PORT", 8083);
    }
    env_parse("HEALTH_PORT", 8083)
}

/// Run the jobs worker
///
/// # Errors
///
/// Returns an error if:
/// - Dispatch, worker, or callback configuration is invalid
/// - No durable backend is configured, or inline mode is forced
/// - The callback HTTP client cannot be built
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics();

    let app_name = env!("CARGO_PKG_NAME");
    let app_version = env!("CARGO_PKG_VERSION");
    info!(name = %app_name, version = %app_version, "Starting jobs worker service");
    info!("Environment: {:?}", environment);

    let health_port = health_port().wrap_err("Failed to load health server port")?;

    let dispatch_config =
        DispatchConfig::from_env().wrap_err("Failed to load dispatch configuration")?;
    let settings = WorkerSettings::from_env().wrap_err("Failed to load worker settings")?;
    let bridge_config = BridgeConfig::from_env().wrap_err("Failed to load callback configuration")?;

    if dispatch_config.mode() != DispatchMode::Durable {
        eyre::bail!("jobs worker needs a durable backend: set REDIS_URL and leave JOB_QUEUE_MODE unforced");
    }

    let connection = Arc::new(SharedConnection::redis_with_retry(
        dispatch_config.backend_url(),
        Default::default(),
    ));
    let pool = Arc::new(
        QueuePool::new(connection).with_prefix(dispatch_config.queue_prefix.clone()),
    );
    info!(prefix = %pool.prefix(), "Queue pool ready");

    let bridge = Arc::new(HttpJobBridge::new(bridge_config)?);
    let dispatcher = Arc::new(Dispatcher::with_pool(
        dispatch_config,
        bridge.clone(),
        pool.clone(),
    ));

    let workers = JobWorkers::start(
        pool.clone(),
        dispatcher,
        bridge.clone(),
        bridge,
        &settings,
    );

    let health_state = HealthState::new(pool, app_name, app_version);
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    if let Err(e) = shutdown_signal().await {
        error!("Error waiting for shutdown signal: {}", e);
    }

    workers.close().await;

    info!("Jobs worker service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result.wrap_err("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
