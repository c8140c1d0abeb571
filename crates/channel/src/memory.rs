//! In-memory broker for tests and single-process runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::message::select_partition;
use crate::{
    Broker, ChannelError, DEFAULT_PARTITIONS, DeliveryReceipt, Message, OutgoingMessage,
    RequiredAcks, Result,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct TopicLog {
    partitions: Vec<Vec<Message>>,
    cursor: u32,
}

impl TopicLog {
    fn with_partitions(count: u32) -> Self {
        Self {
            partitions: (0..count.max(1)).map(|_| Vec::new()).collect(),
            cursor: 0,
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    offsets: HashMap<(String, String, u32), u64>,
    default_partitions: u32,
    unavailable: bool,
    failing_publishes: u32,
    fail_on_commit: bool,
    consume_delay: Option<Duration>,
}

impl BrokerState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(ChannelError::Unavailable("in-memory broker is down".into()));
        }
        Ok(())
    }

    fn topic_mut(&mut self, topic: &str) -> &mut TopicLog {
        let partitions = self.default_partitions;
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::with_partitions(partitions))
    }
}

/// Broker keeping every topic in process memory.
///
/// Cloning shares the same log, so a producer and a consumer built from
/// clones see each other's messages.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl InMemoryBroker {
    /// Creates a broker whose auto-created topics get `default_partitions` partitions.
    pub fn new(default_partitions: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                default_partitions: default_partitions.max(1),
                ..Default::default()
            })),
        }
    }

    /// Makes every call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        guard(&self.state).unavailable = unavailable;
    }

    /// Makes the next `count` publishes fail with `Unavailable`.
    pub fn fail_next_publishes(&self, count: u32) {
        guard(&self.state).failing_publishes = count;
    }

    /// Makes offset commits fail with `Unavailable`.
    pub fn set_fail_on_commit(&self, fail: bool) {
        guard(&self.state).fail_on_commit = fail;
    }

    /// Delays offset reads, fetches and commits by `delay`.
    pub fn set_consume_delay(&self, delay: Option<Duration>) {
        guard(&self.state).consume_delay = delay;
    }

    async fn consume_latency(&self) {
        let delay = guard(&self.state).consume_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Every message of a topic, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        let state = guard(&self.state);
        state
            .topics
            .get(topic)
            .map(|log| log.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn message_count(&self, topic: &str) -> usize {
        let state = guard(&self.state);
        state
            .topics
            .get(topic)
            .map(|log| log.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn create_topic(&self, topic: &str, partitions: u32) -> Result<()> {
        let mut state = guard(&self.state);
        state.check_available()?;
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::with_partitions(partitions));
        Ok(())
    }

    async fn partitions(&self, topic: &str) -> Result<u32> {
        let mut state = guard(&self.state);
        state.check_available()?;
        Ok(state.topic_mut(topic).partitions.len() as u32)
    }

    async fn publish(
        &self,
        topic: &str,
        message: OutgoingMessage,
        _acks: RequiredAcks,
    ) -> Result<DeliveryReceipt> {
        let mut state = guard(&self.state);
        state.check_available()?;
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(ChannelError::Unavailable("injected publish failure".into()));
        }

        let log = state.topic_mut(topic);
        let partition = select_partition(
            message.key.as_deref(),
            log.partitions.len() as u32,
            log.cursor,
        );
        if message.key.is_none() {
            log.cursor = log.cursor.wrapping_add(1);
        }

        let entries = &mut log.partitions[partition as usize];
        let offset = entries.len() as u64;
        entries.push(Message {
            topic: topic.to_string(),
            partition,
            offset,
            key: message.key,
            payload: message.payload,
            headers: message.headers,
            published_at: Utc::now(),
        });

        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max: usize,
    ) -> Result<Vec<Message>> {
        self.consume_latency().await;
        let mut state = guard(&self.state);
        state.check_available()?;
        let log = state.topic_mut(topic);
        let entries =
            log.partitions
                .get(partition as usize)
                .ok_or_else(|| ChannelError::UnknownPartition {
                    topic: topic.to_string(),
                    partition,
                })?;
        Ok(entries
            .iter()
            .skip(offset as usize)
            .take(max)
            .cloned()
            .collect())
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>> {
        self.consume_latency().await;
        let state = guard(&self.state);
        state.check_available()?;
        Ok(state
            .offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied())
    }

    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        next_offset: u64,
    ) -> Result<()> {
        self.consume_latency().await;
        let mut state = guard(&self.state);
        state.check_available()?;
        if state.fail_on_commit {
            return Err(ChannelError::Unavailable("injected commit failure".into()));
        }
        let committed = state
            .offsets
            .entry((group.to_string(), topic.to_string(), partition))
            .or_insert(0);
        *committed = (*committed).max(next_offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyless_publishes_spread_round_robin() {
        let broker = InMemoryBroker::new(3);
        let mut partitions = Vec::new();
        for i in 0..6 {
            let receipt = broker
                .publish(
                    "orders",
                    OutgoingMessage::new(vec![i]),
                    RequiredAcks::All,
                )
                .await
                .unwrap();
            partitions.push(receipt.partition);
        }
        assert_eq!(partitions, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(broker.message_count("orders"), 6);
    }

    #[tokio::test]
    async fn offsets_are_dense_per_partition() {
        let broker = InMemoryBroker::new(1);
        for i in 0..3 {
            let receipt = broker
                .publish("t", OutgoingMessage::new(vec![i]), RequiredAcks::All)
                .await
                .unwrap();
            assert_eq!(receipt.offset, u64::from(i));
        }

        let fetched = broker.fetch("t", 0, 1, 10).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].offset, 1);
        assert_eq!(fetched[0].payload, vec![1]);
    }

    #[tokio::test]
    async fn commits_never_move_backwards() {
        let broker = InMemoryBroker::default();
        assert_eq!(broker.committed_offset("g", "t", 0).await.unwrap(), None);

        broker.commit("g", "t", 0, 5).await.unwrap();
        broker.commit("g", "t", 0, 3).await.unwrap();
        assert_eq!(broker.committed_offset("g", "t", 0).await.unwrap(), Some(5));
        assert_eq!(broker.committed_offset("other", "t", 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn existing_topic_keeps_partition_count() {
        let broker = InMemoryBroker::new(3);
        broker.create_topic("t", 1).await.unwrap();
        broker.create_topic("t", 8).await.unwrap();
        assert_eq!(broker.partitions("t").await.unwrap(), 1);
        assert_eq!(broker.partitions("auto").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn unknown_partition_is_rejected() {
        let broker = InMemoryBroker::new(2);
        let err = broker.fetch("t", 5, 0, 1).await.unwrap_err();
        assert!(matches!(err, ChannelError::UnknownPartition { partition: 5, .. }));
    }

    #[tokio::test]
    async fn injected_publish_failures_are_consumed() {
        let broker = InMemoryBroker::default();
        broker.fail_next_publishes(1);

        let first = broker
            .publish("t", OutgoingMessage::new(vec![]), RequiredAcks::All)
            .await;
        assert!(matches!(first, Err(ChannelError::Unavailable(_))));

        broker
            .publish("t", OutgoingMessage::new(vec![]), RequiredAcks::All)
            .await
            .unwrap();
    }
}
