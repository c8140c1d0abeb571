//! Payment settlement worker.
//!
//! [`SettlementWorker`] opens one payment per order and settles it against
//! the tendered funds, calling back into the order service through
//! [`OrderStatusClient`] so the order ends `paid` or `failed`.
//! [`OrderCreatedHandler`] plugs the worker into the event channel consumer.

pub mod error;
pub mod handler;
pub mod orders;
pub mod worker;

pub use error::{CallbackError, Result, SettlementError};
pub use handler::OrderCreatedHandler;
pub use orders::OrderStatusClient;
pub use worker::{SettleRequest, SettlementWorker, TransactionOutcome};
