//! Stream consumer for Redis operations
//!
//! Handles reading job records from a queue stream using its consumer group.

use crate::config::WorkerConfig;
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::record::{JobRecord, RECORD_FIELD};
use redis::aio::ConnectionManager;
use redis::RedisResult;
use tracing::{debug, info, warn};

type StreamEntries = Vec<(String, Vec<(String, String)>)>;
type StreamReply = Vec<(String, StreamEntries)>;

/// Entries read in one call.
#[derive(Debug, Default)]
pub struct Batch {
    pub events: Vec<StreamEvent>,
    /// Entries without a readable record; nothing can ever process them
    pub malformed: Vec<String>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.malformed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len() + self.malformed.len()
    }
}

/// Stream consumer for Redis operations
#[derive(Clone)]
pub struct StreamConsumer {
    redis: ConnectionManager,
    config: WorkerConfig,
}

impl StreamConsumer {
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self { redis, config }
    }

    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }

    pub fn consumer_group(&self) -> &str {
        &self.config.consumer_group
    }

    pub fn consumer_id(&self) -> &str {
        &self.config.consumer_id
    }

    /// Initialize the consumer group if it doesn't exist
    pub async fn init_consumer_group(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
            }
            Err(e) => return Err(StreamError::Redis(e)),
        }

        Ok(())
    }

    /// Entries delivered to this consumer but never acknowledged.
    pub async fn read_pending(&self, count: usize) -> Result<Batch, StreamError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<Option<StreamReply>> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg("0")
            .query_async(&mut conn)
            .await;

        self.reply_to_batch(result)
    }

    /// Entries never delivered to any consumer of the group.
    pub async fn read_new(&self, count: usize) -> Result<Batch, StreamError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id);

        if let Some(timeout) = self.config.blocking_timeout_ms {
            cmd.arg("BLOCK").arg(timeout);
        }

        cmd.arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">");

        let result: RedisResult<Option<StreamReply>> = cmd.query_async(&mut conn).await;
        self.reply_to_batch(result)
    }

    /// Acknowledge an entry and drop it from the live stream.
    pub async fn ack(&self, stream_id: &str) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let _: (i64, i64) = redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(stream_id)
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(stream_id)
            .query_async(&mut conn)
            .await?;

        debug!(stream_id = %stream_id, "Acknowledged message");
        Ok(())
    }

    /// Claim entries other consumers left idle past the claim timeout.
    pub async fn claim_abandoned(&self, count: usize) -> Result<Batch, StreamError> {
        let mut conn = self.redis.clone();

        // (id, consumer, idle ms, delivery count)
        let pending: RedisResult<Vec<(String, String, u64, u32)>> = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(self.config.claim_timeout_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await;

        let pending = match pending {
            Ok(p) => p,
            Err(e) if e.code() == Some("NOGROUP") => return Ok(Batch::default()),
            Err(e) => return Err(StreamError::Redis(e)),
        };

        let claimable: Vec<(String, u32)> = pending
            .into_iter()
            .filter(|(_, consumer, _, _)| consumer != &self.config.consumer_id)
            .map(|(id, _, _, deliveries)| (id, deliveries))
            .collect();

        if claimable.is_empty() {
            return Ok(Batch::default());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(self.config.claim_timeout_ms);

        for (id, _) in &claimable {
            cmd.arg(id);
        }

        let entries: StreamEntries = cmd.query_async(&mut conn).await?;
        let mut batch = parse_entries(entries);

        for event in &mut batch.events {
            if let Some((_, deliveries)) = claimable.iter().find(|(id, _)| id == &event.stream_id) {
                event.delivery_count = deliveries + 1;
            }
        }

        if !batch.is_empty() {
            warn!(
                stream = %self.config.stream_name,
                count = batch.len(),
                "Claimed abandoned messages"
            );
        }

        Ok(batch)
    }

    fn reply_to_batch(
        &self,
        result: RedisResult<Option<StreamReply>>,
    ) -> Result<Batch, StreamError> {
        match result {
            Ok(Some(streams)) => {
                let mut batch = Batch::default();
                for (_stream, entries) in streams {
                    let parsed = parse_entries(entries);
                    batch.events.extend(parsed.events);
                    batch.malformed.extend(parsed.malformed);
                }
                Ok(batch)
            }
            Ok(None) => Ok(Batch::default()),
            Err(e) if e.code() == Some("NOGROUP") => {
                debug!(stream = %self.config.stream_name, "Consumer group not created yet");
                Ok(Batch::default())
            }
            Err(e) => Err(StreamError::Redis(e)),
        }
    }
}

fn parse_entries(entries: StreamEntries) -> Batch {
    let mut batch = Batch::default();

    for (stream_id, fields) in entries {
        let Some(json) = fields
            .iter()
            .find(|(k, _)| k == RECORD_FIELD)
            .map(|(_, v)| v.as_str())
        else {
            warn!(
                stream_id = %stream_id,
                fields = ?fields.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
                "Missing 'job' field in message"
            );
            batch.malformed.push(stream_id);
            continue;
        };

        match JobRecord::from_json(json) {
            Ok(record) => batch.events.push(StreamEvent::new(stream_id, record)),
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "Failed to parse job record");
                batch.malformed.push(stream_id);
            }
        }
    }

    batch
}
