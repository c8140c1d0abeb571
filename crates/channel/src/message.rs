use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message headers, kept ordered so stored rows compare deterministically.
pub type Headers = BTreeMap<String, String>;

pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_EVENT_TYPE: &str = "x-event-type";
pub const HEADER_SCHEMA_VERSION: &str = "x-schema-version";
pub const HEADER_DLQ_REASON: &str = "x-dlq-reason";
pub const HEADER_ORIGINAL_PARTITION: &str = "x-original-partition";
pub const HEADER_ORIGINAL_OFFSET: &str = "x-original-offset";

/// A message handed to a broker for publishing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Partition key. Keyless messages are spread round-robin.
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl OutgoingMessage {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            key: None,
            payload,
            headers: Headers::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A message as stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub published_at: DateTime<Utc>,
}

impl Message {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Where a published message landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// Name of the dead-letter topic paired with `topic`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}.dlq")
}

/// Picks the partition for a message.
///
/// Keyed messages always map to the same partition (FNV-1a of the key);
/// keyless ones take the caller's round-robin cursor.
pub(crate) fn select_partition(key: Option<&str>, partitions: u32, cursor: u32) -> u32 {
    let partitions = partitions.max(1);
    match key {
        Some(key) => {
            let mut hash: u32 = 0x811c_9dc5;
            for byte in key.bytes() {
                hash ^= u32::from(byte);
                hash = hash.wrapping_mul(0x0100_0193);
            }
            hash % partitions
        }
        None => cursor % partitions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_messages_stick_to_one_partition() {
        let first = select_partition(Some("user-7"), 3, 0);
        for cursor in 0..10 {
            assert_eq!(select_partition(Some("user-7"), 3, cursor), first);
        }
    }

    #[test]
    fn keyless_messages_follow_the_cursor() {
        let picked: Vec<u32> = (0..6).map(|c| select_partition(None, 3, c)).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn dead_letter_topic_appends_suffix() {
        assert_eq!(dead_letter_topic("order.created"), "order.created.dlq");
    }

    #[test]
    fn builder_sets_key_and_headers() {
        let message = OutgoingMessage::new(b"{}".to_vec())
            .with_key("k")
            .with_header(HEADER_EVENT_TYPE, "order.created");
        assert_eq!(message.key.as_deref(), Some("k"));
        assert_eq!(
            message.headers.get(HEADER_EVENT_TYPE).map(String::as_str),
            Some("order.created")
        );
    }
}
