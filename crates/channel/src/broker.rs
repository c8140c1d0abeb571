use std::sync::Arc;

use async_trait::async_trait;

use crate::{DeliveryReceipt, Message, OutgoingMessage, Result};

/// Partition count given to topics created on first use.
pub const DEFAULT_PARTITIONS: u32 = 3;

/// How much replication a publish waits for before it counts as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequiredAcks {
    /// Fire and forget.
    None,
    /// The partition leader has the message.
    Leader,
    /// Every in-sync replica has the message.
    #[default]
    All,
}

/// A durable, partitioned, append-only message log with consumer-group offsets.
///
/// Offsets within a partition are dense and start at 0. Messages within a
/// partition are returned in offset order; there is no ordering across
/// partitions.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Creates the topic if it does not exist yet. Existing topics keep their
    /// partition count.
    async fn create_topic(&self, topic: &str, partitions: u32) -> Result<()>;

    /// Partition count of the topic, creating it with the broker default if needed.
    async fn partitions(&self, topic: &str) -> Result<u32>;

    /// Appends a message, creating the topic on first use.
    async fn publish(
        &self,
        topic: &str,
        message: OutgoingMessage,
        acks: RequiredAcks,
    ) -> Result<DeliveryReceipt>;

    /// Reads up to `max` messages starting at `offset`.
    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max: usize,
    ) -> Result<Vec<Message>>;

    /// Next offset the group should read, or None if it never committed.
    async fn committed_offset(&self, group: &str, topic: &str, partition: u32)
    -> Result<Option<u64>>;

    /// Records that the group has finished every message before `next_offset`.
    /// Commits never move a group backwards.
    async fn commit(&self, group: &str, topic: &str, partition: u32, next_offset: u64)
    -> Result<()>;
}

#[async_trait]
impl<T: Broker + ?Sized> Broker for Arc<T> {
    async fn create_topic(&self, topic: &str, partitions: u32) -> Result<()> {
        (**self).create_topic(topic, partitions).await
    }

    async fn partitions(&self, topic: &str) -> Result<u32> {
        (**self).partitions(topic).await
    }

    async fn publish(
        &self,
        topic: &str,
        message: OutgoingMessage,
        acks: RequiredAcks,
    ) -> Result<DeliveryReceipt> {
        (**self).publish(topic, message, acks).await
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max: usize,
    ) -> Result<Vec<Message>> {
        (**self).fetch(topic, partition, offset, max).await
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>> {
        (**self).committed_offset(group, topic, partition).await
    }

    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        next_offset: u64,
    ) -> Result<()> {
        (**self).commit(group, topic, partition, next_offset).await
    }
}
