//! Wire format of the order-created event.
//!
//! The payload is JSON. `schema_version` carries the major version; readers
//! accept every payload whose major they know and ignore fields they don't.
//! Optional fields default so that older producers stay readable.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{HEADER_CONTENT_TYPE, HEADER_EVENT_TYPE, HEADER_SCHEMA_VERSION};
use crate::{ChannelError, OutgoingMessage, Result};

pub const EVENT_TYPE: &str = "order.created";
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
pub const PENDING_STATUS: &str = "Pending";

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

fn default_status() -> String {
    PENDING_STATUS.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineRecord {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Announces a freshly persisted pending order.
///
/// Consumers treat it as a trigger only; the order ledger stays the source
/// of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub order_lines: Vec<OrderLineRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl OrderCreatedEvent {
    pub fn new(
        order_id: OrderId,
        user_id: UserId,
        total_price: Money,
        order_lines: Vec<OrderLineRecord>,
    ) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            event_id: Some(Uuid::new_v4()),
            order_id,
            user_id,
            total_price,
            status: default_status(),
            order_lines,
            created_at: Some(Utc::now()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status.eq_ignore_ascii_case(PENDING_STATUS)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Wraps the encoded event in a keyless message with type headers.
    pub fn to_message(&self) -> Result<OutgoingMessage> {
        Ok(OutgoingMessage::new(self.encode()?)
            .with_header(HEADER_CONTENT_TYPE, "application/json")
            .with_header(HEADER_EVENT_TYPE, EVENT_TYPE)
            .with_header(HEADER_SCHEMA_VERSION, self.schema_version.to_string()))
    }

    /// Parses and checks a payload.
    ///
    /// Fails with `UnsupportedSchema` for an unknown major version and with
    /// `Malformed` for undecodable JSON or values no order can have.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let event: Self = serde_json::from_slice(payload)
            .map_err(|e| ChannelError::Malformed(format!("undecodable order event: {e}")))?;

        if event.schema_version == 0 || event.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(ChannelError::UnsupportedSchema(event.schema_version));
        }
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<()> {
        if self.order_id.as_i64() <= 0 {
            return Err(ChannelError::Malformed(format!(
                "invalid order id {}",
                self.order_id
            )));
        }
        if self.total_price.is_negative() {
            return Err(ChannelError::Malformed(format!(
                "negative total price {} for order {}",
                self.total_price, self.order_id
            )));
        }
        if self.order_lines.iter().any(|line| line.quantity == 0) {
            return Err(ChannelError::Malformed(format!(
                "zero quantity line in order {}",
                self.order_id
            )));
        }
        Ok(())
    }
}
