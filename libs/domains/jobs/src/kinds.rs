//! The closed set of job kinds and their payloads.

use serde::{Deserialize, Serialize};
use stream_worker::StreamJob;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

/// Job type. Each kind has one payload shape, one queue and one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    InboundProcess,
    OutboundSend,
    FileTransfer,
}

impl JobKind {
    /// Durable queue name for this kind.
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobKind::InboundProcess => InboundProcessPayload::QUEUE,
            JobKind::OutboundSend => OutboundSendPayload::QUEUE,
            JobKind::FileTransfer => FileTransferPayload::QUEUE,
        }
    }
}

/// Process one inbound update received from the messaging provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundProcessPayload {
    pub tenant_id: Uuid,
    pub bot_id: Uuid,
    /// Provider-assigned update sequence number
    pub update_id: i64,
    /// Raw update body, interpreted only by the handler
    pub update: serde_json::Value,
}

impl StreamJob for InboundProcessPayload {
    const QUEUE: &'static str = "inbound-process";

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("inbound:{}:{}", self.bot_id, self.update_id))
    }
}

/// Deliver a message row that already exists in the queued state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundSendPayload {
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Uuid,
}

impl StreamJob for OutboundSendPayload {
    const QUEUE: &'static str = "outbound-send";

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("outbound:{}", self.message_id))
    }
}

/// Download a provider file and re-upload it to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferPayload {
    pub tenant_id: Uuid,
    pub bot_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
    pub attachment_id: Uuid,
    /// Provider file handle
    pub file_id: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl StreamJob for FileTransferPayload {
    const QUEUE: &'static str = "file-transfer";

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("file:{}", self.attachment_id))
    }
}

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Job {
    InboundProcess(InboundProcessPayload),
    OutboundSend(OutboundSendPayload),
    FileTransfer(FileTransferPayload),
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::InboundProcess(_) => JobKind::InboundProcess,
            Job::OutboundSend(_) => JobKind::OutboundSend,
            Job::FileTransfer(_) => JobKind::FileTransfer,
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        match self {
            Job::InboundProcess(p) => p.tenant_id,
            Job::OutboundSend(p) => p.tenant_id,
            Job::FileTransfer(p) => p.tenant_id,
        }
    }

    pub fn idempotency_key(&self) -> Option<String> {
        match self {
            Job::InboundProcess(p) => p.idempotency_key(),
            Job::OutboundSend(p) => p.idempotency_key(),
            Job::FileTransfer(p) => p.idempotency_key(),
        }
    }
}

impl From<InboundProcessPayload> for Job {
    fn from(payload: InboundProcessPayload) -> Self {
        Job::InboundProcess(payload)
    }
}

impl From<OutboundSendPayload> for Job {
    fn from(payload: OutboundSendPayload) -> Self {
        Job::OutboundSend(payload)
    }
}

impl From<FileTransferPayload> for Job {
    fn from(payload: FileTransferPayload) -> Self {
        Job::FileTransfer(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_kind_names_match_queues() {
        for kind in JobKind::iter() {
            assert_eq!(kind.to_string(), kind.queue_name());
            assert_eq!(JobKind::from_str(kind.as_ref()).unwrap(), kind);
        }
        assert_eq!(JobKind::FileTransfer.queue_name(), "file-transfer");
    }

    #[test]
    fn test_job_wire_format() {
        let job = Job::from(OutboundSendPayload {
            tenant_id: Uuid::nil(),
            conversation_id: Uuid::nil(),
            message_id: Uuid::nil(),
        });

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "outbound-send");
        assert_eq!(value["payload"]["message_id"], Uuid::nil().to_string());
        assert_eq!(serde_json::from_value::<Job>(value).unwrap(), job);
    }

    #[test]
    fn test_file_transfer_optional_fields() {
        let payload: FileTransferPayload = serde_json::from_value(json!({
            "tenant_id": Uuid::nil(),
            "bot_id": Uuid::nil(),
            "attachment_id": Uuid::nil(),
            "file_id": "AgADBAAD",
            "file_name": "photo.jpg"
        }))
        .unwrap();

        assert!(payload.client_id.is_none());
        assert!(payload.mime_type.is_none());
        assert!(payload.size.is_none());
    }

    #[test]
    fn test_idempotency_keys() {
        let bot_id = Uuid::now_v7();
        let inbound = Job::from(InboundProcessPayload {
            tenant_id: Uuid::nil(),
            bot_id,
            update_id: 42,
            update: json!({}),
        });

        assert_eq!(inbound.kind(), JobKind::InboundProcess);
        assert_eq!(
            inbound.idempotency_key(),
            Some(format!("inbound:{}:42", bot_id))
        );
    }
}
