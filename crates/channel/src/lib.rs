//! Event channel between the order coordinator and the settlement worker.
//!
//! Topics are split into partitions; each partition is an append-only log
//! with dense offsets. Delivery is at-least-once: consumers commit after
//! handling, so a crash redelivers. Messages that can never be handled go
//! to `<topic>.dlq` instead of blocking their partition.

pub mod broker;
pub mod consumer;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod producer;

pub use broker::{Broker, DEFAULT_PARTITIONS, RequiredAcks};
pub use consumer::{Consumer, ConsumerConfig, HandlerError, MessageHandler, PollStats};
pub use error::{ChannelError, Result};
pub use event::{CURRENT_SCHEMA_VERSION, EVENT_TYPE, OrderCreatedEvent, OrderLineRecord};
pub use memory::InMemoryBroker;
pub use message::{DeliveryReceipt, Headers, Message, OutgoingMessage, dead_letter_topic};
pub use postgres::PostgresBroker;
pub use producer::{EventProducer, ProducerConfig};
