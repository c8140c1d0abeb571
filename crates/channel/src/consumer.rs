//! Consumer-group loop.
//!
//! A consumer reads each assigned partition from the group's committed
//! offset, hands messages to its handler one at a time, and commits only
//! after the handler returns. A crash between handling and committing
//! therefore redelivers the message, so handlers must be idempotent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::DEFAULT_CALL_TIMEOUT;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::message::{HEADER_DLQ_REASON, HEADER_ORIGINAL_OFFSET, HEADER_ORIGINAL_PARTITION};
use crate::{
    Broker, ChannelError, Message, OutgoingMessage, RequiredAcks, Result, dead_letter_topic,
};

/// How a handler failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The message can never be processed. It is dead-lettered and committed.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Processing may succeed later. The offset is left uncommitted.
    #[error("retryable failure: {0}")]
    Retryable(String),
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerError>;
}

#[async_trait]
impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerError> {
        (**self).handle(message).await
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group_id: String,
    pub topic: String,
    /// Partitions owned by this instance. `None` means all of them.
    pub partitions: Option<Vec<u32>>,
    pub batch_size: usize,
    /// Pause after a poll that found nothing.
    pub poll_interval: Duration,
    /// Pause after a retryable handler failure or a broker error.
    pub retry_backoff: Duration,
    /// Bound on a single broker call.
    pub call_timeout: Duration,
}

impl ConsumerConfig {
    pub fn new(group_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            topic: topic.into(),
            partitions: None,
            batch_size: 32,
            poll_interval: Duration::from_millis(250),
            retry_backoff: Duration::from_secs(1),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_partitions(mut self, partitions: Vec<u32>) -> Self {
        self.partitions = Some(partitions);
        self
    }
}

/// Outcome counts of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub handled: usize,
    pub dead_lettered: usize,
    /// Partitions stopped early by a retryable failure.
    pub deferred: usize,
}

impl PollStats {
    pub fn is_idle(&self) -> bool {
        self.handled == 0 && self.dead_lettered == 0
    }
}

pub struct Consumer<B, H> {
    broker: B,
    handler: H,
    config: ConsumerConfig,
}

impl<B: Broker, H: MessageHandler> Consumer<B, H> {
    pub fn new(broker: B, handler: H, config: ConsumerConfig) -> Self {
        Self {
            broker,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Polls until `shutdown` is cancelled.
    ///
    /// Cancellation stops the loop from taking new messages; a message whose
    /// handler is already running is finished and committed first.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            group = %self.config.group_id,
            topic = %self.config.topic,
            "consumer started"
        );

        while !shutdown.is_cancelled() {
            let pause = match self.poll(&shutdown).await {
                Ok(stats) if stats.deferred > 0 => self.config.retry_backoff,
                Ok(stats) if stats.is_idle() => self.config.poll_interval,
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "consumer poll failed");
                    self.config.retry_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!(group = %self.config.group_id, "consumer stopped");
    }

    /// Processes one batch from every assigned partition.
    pub async fn poll_once(&self) -> Result<PollStats> {
        self.poll(&CancellationToken::new()).await
    }

    async fn poll(&self, shutdown: &CancellationToken) -> Result<PollStats> {
        let partitions = match &self.config.partitions {
            Some(partitions) => partitions.clone(),
            None => {
                let count = self.bounded(self.broker.partitions(&self.config.topic)).await?;
                (0..count).collect()
            }
        };

        let mut stats = PollStats::default();
        for partition in partitions {
            if shutdown.is_cancelled() {
                break;
            }
            self.poll_partition(partition, shutdown, &mut stats).await?;
        }
        Ok(stats)
    }

    #[tracing::instrument(skip(self, shutdown, stats), fields(topic = %self.config.topic))]
    async fn poll_partition(
        &self,
        partition: u32,
        shutdown: &CancellationToken,
        stats: &mut PollStats,
    ) -> Result<()> {
        let group = &self.config.group_id;
        let topic = &self.config.topic;

        let start = self
            .bounded(self.broker.committed_offset(group, topic, partition))
            .await?
            .unwrap_or(0);
        let batch = self
            .bounded(self.broker.fetch(topic, partition, start, self.config.batch_size))
            .await?;

        for message in batch {
            if shutdown.is_cancelled() {
                break;
            }

            match self.handler.handle(&message).await {
                Ok(()) => {
                    stats.handled += 1;
                    metrics::counter!("channel_consumed_total").increment(1);
                }
                Err(HandlerError::Malformed(reason)) => {
                    self.dead_letter(&message, &reason).await?;
                    stats.dead_lettered += 1;
                }
                Err(HandlerError::Retryable(reason)) => {
                    tracing::warn!(
                        offset = message.offset,
                        %reason,
                        "handler deferred message, will redeliver"
                    );
                    stats.deferred += 1;
                    return Ok(());
                }
            }

            self.bounded(self.broker.commit(group, topic, partition, message.offset + 1))
                .await?;
        }

        Ok(())
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.config.call_timeout)),
        }
    }

    async fn dead_letter(&self, message: &Message, reason: &str) -> Result<()> {
        let dlq = dead_letter_topic(&self.config.topic);
        let outgoing = OutgoingMessage {
            key: message.key.clone(),
            payload: message.payload.clone(),
            headers: message.headers.clone(),
        }
        .with_header(HEADER_DLQ_REASON, reason)
        .with_header(HEADER_ORIGINAL_PARTITION, message.partition.to_string())
        .with_header(HEADER_ORIGINAL_OFFSET, message.offset.to_string());

        self.bounded(self.broker.publish(&dlq, outgoing, RequiredAcks::All))
            .await?;

        metrics::counter!("channel_dead_lettered_total").increment(1);
        tracing::warn!(
            partition = message.partition,
            offset = message.offset,
            %reason,
            dead_letter_topic = %dlq,
            "message dead-lettered"
        );
        Ok(())
    }
}
