//! HTTP bridge to the platform API.
//!
//! The worker owns no business logic or database of its own: every handler
//! call and bookkeeping write is posted back to the API that enqueued the job.

use async_trait::async_trait;
use core_config::{env_optional, env_parse, env_required, ConfigError, FromEnv};
use domain_jobs::{
    AuditEntry, FileTransferPayload, InboundOutcome, InboundProcessPayload, JobFailure,
    JobHandlers, JobStore, OutboundSendPayload, StoreError, StoreResult,
};
use eyre::WrapErr;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use stream_worker::JobContext;
use tracing::debug;
use uuid::Uuid;

/// Callback endpoint settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub callback_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl FromEnv for BridgeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            callback_url: env_required("JOB_CALLBACK_URL")?
                .trim_end_matches('/')
                .to_string(),
            token: env_optional("JOB_CALLBACK_TOKEN"),
            request_timeout: Duration::from_secs(env_parse("JOB_CALLBACK_TIMEOUT_SECS", 30)?),
        })
    }
}

#[derive(Serialize)]
struct HandlerCall<'a, P> {
    payload: &'a P,
    context: &'a JobContext,
}

/// [`JobHandlers`] and [`JobStore`] backed by callbacks to the platform API.
#[derive(Clone)]
pub struct HttpJobBridge {
    client: Client,
    config: BridgeConfig,
}

impl HttpJobBridge {
    pub fn new(config: BridgeConfig) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .wrap_err("Failed to build callback HTTP client")?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.callback_url, path)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> reqwest::Result<Response> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        debug!(path = %path, "Posting job callback");
        request.send().await
    }

    async fn call_handler<P: Serialize>(
        &self,
        kind: &str,
        payload: &P,
        ctx: &JobContext,
    ) -> eyre::Result<Response> {
        let path = format!("/jobs/{}", kind);
        let response = self
            .post(&path, &HandlerCall { payload, context: ctx })
            .await
            .wrap_err_with(|| format!("calling {} handler", kind))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("{} handler returned {}: {}", kind, status, body.trim());
        if is_permanent_status(status) {
            Err(JobFailure::permanent(message).into())
        } else {
            Err(eyre::eyre!(message))
        }
    }

    async fn store_write<B: Serialize>(
        &self,
        path: &str,
        entity: &'static str,
        id: String,
        body: &B,
    ) -> StoreResult<()> {
        let response = self
            .post(path, body)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { entity, id }),
            status if status.is_server_error() => Err(StoreError::Unavailable(format!(
                "{} returned {}",
                path, status
            ))),
            status => Err(StoreError::Internal(format!("{} returned {}", path, status))),
        }
    }
}

/// Client errors will not change on retry, except timeouts and throttling.
pub fn is_permanent_status(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl JobHandlers for HttpJobBridge {
    async fn process_inbound(
        &self,
        payload: &InboundProcessPayload,
        ctx: &JobContext,
    ) -> eyre::Result<InboundOutcome> {
        let response = self.call_handler("inbound-process", payload, ctx).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(InboundOutcome::default());
        }
        response
            .json::<InboundOutcome>()
            .await
            .wrap_err("decoding inbound outcome")
    }

    async fn send_outbound(
        &self,
        payload: &OutboundSendPayload,
        ctx: &JobContext,
    ) -> eyre::Result<()> {
        self.call_handler("outbound-send", payload, ctx).await?;
        Ok(())
    }

    async fn transfer_file(
        &self,
        payload: &FileTransferPayload,
        ctx: &JobContext,
    ) -> eyre::Result<()> {
        self.call_handler("file-transfer", payload, ctx).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for HttpJobBridge {
    async fn mark_update_processed(&self, bot_id: Uuid, update_id: i64) -> StoreResult<()> {
        self.store_write(
            "/jobs/updates/processed",
            "update",
            format!("{}:{}", bot_id, update_id),
            &json!({ "bot_id": bot_id, "update_id": update_id }),
        )
        .await
    }

    async fn mark_update_failed(
        &self,
        bot_id: Uuid,
        update_id: i64,
        error: &str,
    ) -> StoreResult<()> {
        self.store_write(
            "/jobs/updates/failed",
            "update",
            format!("{}:{}", bot_id, update_id),
            &json!({ "bot_id": bot_id, "update_id": update_id, "error": error }),
        )
        .await
    }

    async fn mark_message_failed(&self, message_id: Uuid, reason: &str) -> StoreResult<()> {
        self.store_write(
            "/jobs/messages/failed",
            "message",
            message_id.to_string(),
            &json!({ "message_id": message_id, "reason": reason }),
        )
        .await
    }

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        let id = entry.entity_id.clone();
        self.store_write("/jobs/audit", "audit", id, &entry).await
    }
}
