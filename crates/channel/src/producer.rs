//! Publishing with bounded retries.

use std::time::Duration;

use crate::{
    Broker, ChannelError, DeliveryReceipt, OrderCreatedEvent, OutgoingMessage, RequiredAcks,
    Result,
};

const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub required_acks: RequiredAcks,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_backoff: Duration,
    /// Bound on a single broker call.
    pub call_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            required_acks: RequiredAcks::All,
            max_retries: 5,
            retry_backoff: Duration::from_millis(100),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Publishes messages, retrying transient broker failures.
#[derive(Debug, Clone)]
pub struct EventProducer<B> {
    broker: B,
    config: ProducerConfig,
}

impl<B: Broker> EventProducer<B> {
    pub fn new(broker: B) -> Self {
        Self::with_config(broker, ProducerConfig::default())
    }

    pub fn with_config(broker: B, config: ProducerConfig) -> Self {
        Self { broker, config }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Publishes `message`, retrying up to `max_retries` times.
    ///
    /// Non-retryable errors return at once; exhausting the budget yields
    /// `PublishFailed`.
    #[tracing::instrument(skip(self, message), fields(bytes = message.payload.len()))]
    pub async fn send(&self, topic: &str, message: OutgoingMessage) -> Result<DeliveryReceipt> {
        let attempts = self.config.max_retries + 1;
        let mut backoff = self.config.retry_backoff;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let call = self
                .broker
                .publish(topic, message.clone(), self.config.required_acks);
            let result = match tokio::time::timeout(self.config.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Timeout(self.config.call_timeout)),
            };

            match result {
                Ok(receipt) => {
                    metrics::counter!("channel_published_total").increment(1);
                    tracing::debug!(
                        partition = receipt.partition,
                        offset = receipt.offset,
                        attempt,
                        "message published"
                    );
                    return Ok(receipt);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "publish attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        metrics::counter!("channel_publish_retries_total").increment(1);
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }

        Err(ChannelError::PublishFailed {
            topic: topic.to_string(),
            attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    pub async fn publish_event(
        &self,
        topic: &str,
        event: &OrderCreatedEvent,
    ) -> Result<DeliveryReceipt> {
        self.send(topic, event.to_message()?).await
    }
}
