//! Inspection of retained completed and failed jobs.
//!
//! History streams are capped at the queue's retention bounds on every write,
//! so they only ever hold the most recent records.

use crate::error::StreamError;
use crate::keys::HistoryKind;
use crate::queue::{EnqueuedJob, StreamQueue};
use crate::record::{JobRecord, RECORD_FIELD};
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{info, warn};

type StreamEntries = Vec<(String, Vec<(String, String)>)>;

/// A history record with its entry id.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub entry_id: String,
    pub record: JobRecord,
}

/// Read/maintenance access to one queue's history streams.
pub struct JobHistory<'a> {
    queue: &'a StreamQueue,
}

impl<'a> JobHistory<'a> {
    pub(crate) fn new(queue: &'a StreamQueue) -> Self {
        Self { queue }
    }

    pub async fn len(&self, kind: HistoryKind) -> Result<u64, StreamError> {
        let mut conn = self.queue.conn().await?;
        Ok(conn.xlen(self.queue.keys().history(kind)).await?)
    }

    /// Most recent entries first.
    pub async fn list(
        &self,
        kind: HistoryKind,
        count: usize,
    ) -> Result<Vec<HistoryEntry>, StreamError> {
        let mut conn = self.queue.conn().await?;

        let entries: StreamEntries = redis::cmd("XREVRANGE")
            .arg(self.queue.keys().history(kind))
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(parse_entries(entries))
    }

    pub async fn get(
        &self,
        kind: HistoryKind,
        entry_id: &str,
    ) -> Result<Option<HistoryEntry>, StreamError> {
        let mut conn = self.queue.conn().await?;

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(self.queue.keys().history(kind))
            .arg(entry_id)
            .arg(entry_id)
            .query_async(&mut conn)
            .await?;

        Ok(parse_entries(entries).into_iter().next())
    }

    /// Drop every entry of one history stream. Returns how many were removed.
    pub async fn purge(&self, kind: HistoryKind) -> Result<u64, StreamError> {
        let mut conn = self.queue.conn().await?;
        let key = self.queue.keys().history(kind);

        let len: u64 = conn.xlen(key).await?;
        if len > 0 {
            let _: i64 = redis::cmd("XTRIM")
                .arg(key)
                .arg("MAXLEN")
                .arg(0)
                .query_async(&mut conn)
                .await?;

            info!(queue = %self.queue.name(), history = %kind, count = len, "Purged job history");
        }

        Ok(len)
    }

    /// Re-enqueue a failed job with a fresh attempt budget.
    ///
    /// Returns `None` when no failed entry has that id.
    pub async fn retry_failed(&self, entry_id: &str) -> Result<Option<EnqueuedJob>, StreamError> {
        let Some(entry) = self.get(HistoryKind::Failed, entry_id).await? else {
            return Ok(None);
        };

        let record = entry.record.rerun();
        let stream_id = self.queue.push(&record).await?;

        let mut conn = self.queue.conn().await?;
        let _: i64 = conn
            .xdel(self.queue.keys().history(HistoryKind::Failed), &[entry_id])
            .await?;

        info!(
            queue = %self.queue.name(),
            job_id = %record.id,
            entry_id = %entry_id,
            "Re-enqueued failed job"
        );

        Ok(Some(EnqueuedJob {
            job_id: record.id,
            queue: self.queue.name().to_string(),
            stream_id,
        }))
    }
}

fn parse_entries(entries: StreamEntries) -> Vec<HistoryEntry> {
    entries
        .into_iter()
        .filter_map(|(entry_id, fields)| {
            let json = fields.iter().find(|(k, _)| k == RECORD_FIELD).map(|(_, v)| v)?;
            match JobRecord::from_json(json) {
                Ok(record) => Some(HistoryEntry { entry_id, record }),
                Err(e) => {
                    warn!(entry_id = %entry_id, error = %e, "Skipping unreadable history entry");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::JobOptions;

    #[test]
    fn test_parse_entries_skips_garbage() {
        let record = JobRecord::new("q", serde_json::json!({"n": 1}), &JobOptions::default(), None);
        let entries = vec![
            (
                "1-0".to_string(),
                vec![(RECORD_FIELD.to_string(), record.to_json().unwrap())],
            ),
            ("2-0".to_string(), vec![(RECORD_FIELD.to_string(), "{".to_string())]),
            ("3-0".to_string(), vec![("other".to_string(), "x".to_string())]),
        ];

        let parsed = parse_entries(entries);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].entry_id, "1-0");
        assert_eq!(parsed[0].record.id, record.id);
    }
}
