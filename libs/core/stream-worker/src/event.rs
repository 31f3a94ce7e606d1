//! A delivered stream entry: the job record plus its stream metadata.

use crate::record::JobRecord;
use chrono::{DateTime, Utc};

/// One delivery of a job record from a consumer group.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Redis stream entry ID (e.g., "1234567890123-0")
    pub stream_id: String,

    pub record: JobRecord,

    /// When the entry was appended (parsed from the stream ID)
    pub timestamp: DateTime<Utc>,

    /// Deliveries of this entry, greater than 1 after a claim
    pub delivery_count: u32,
}

impl StreamEvent {
    pub fn new(stream_id: String, record: JobRecord) -> Self {
        Self::with_delivery_count(stream_id, record, 1)
    }

    pub fn with_delivery_count(stream_id: String, record: JobRecord, delivery_count: u32) -> Self {
        let timestamp = parse_timestamp(&stream_id);
        Self {
            stream_id,
            record,
            timestamp,
            delivery_count,
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    /// Milliseconds since the entry was appended.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp).num_milliseconds()
    }
}

/// Stream IDs are `<unix-ms>-<seq>`.
fn parse_timestamp(stream_id: &str) -> DateTime<Utc> {
    stream_id
        .split('-')
        .next()
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::JobOptions;

    fn record() -> JobRecord {
        JobRecord::new("q", serde_json::json!({}), &JobOptions::default(), None)
    }

    #[test]
    fn test_parse_timestamp() {
        let stream_id = format!("{}-0", Utc::now().timestamp_millis());
        let event = StreamEvent::new(stream_id, record());

        assert!(event.age_ms() < 1000);
        assert!(!event.is_redelivery());
    }

    #[test]
    fn test_claimed_entry_is_redelivery() {
        let event = StreamEvent::with_delivery_count("1234567890123-0".to_string(), record(), 3);

        assert!(event.is_redelivery());
        assert_eq!(event.timestamp.timestamp_millis(), 1234567890123);
    }
}
