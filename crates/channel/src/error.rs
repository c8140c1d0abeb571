use common::ErrorKind;
use thiserror::Error;

/// Errors raised by brokers, producers and consumers.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A broker call did not finish in time.
    #[error("Broker call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The producer gave up after its retry budget.
    #[error("Publish to {topic} failed after {attempts} attempts: {last_error}")]
    PublishFailed {
        topic: String,
        attempts: u32,
        last_error: String,
    },

    /// The partition does not exist for the topic.
    #[error("Topic {topic} has no partition {partition}")]
    UnknownPartition { topic: String, partition: u32 },

    /// A payload could not be decoded or violates the event contract.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The payload declares a schema major version this build cannot read.
    #[error("Unsupported schema version {0}")]
    UnsupportedSchema(u32),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Unavailable(_)
            | ChannelError::Timeout(_)
            | ChannelError::PublishFailed { .. }
            | ChannelError::Database(_) => ErrorKind::Transient,
            ChannelError::UnknownPartition { .. }
            | ChannelError::Malformed(_)
            | ChannelError::UnsupportedSchema(_)
            | ChannelError::Serialization(_) => ErrorKind::Validation,
        }
    }

    /// True when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
