use common::{DeadlineExceeded, ErrorKind, Money, OrderId, PaymentId};
use ledger::{LedgerError, OrderStatus};
use thiserror::Error;

/// Failure reported by the order service when reading or updating an order.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order service refused the update, e.g. a move out of a terminal status.
    #[error("Order update rejected: {0}")]
    Rejected(String),

    #[error("Order service unavailable: {0}")]
    Unavailable(String),

    /// The status was applied but giving the order's stock back failed.
    #[error("Order updated but compensation failed: {0}")]
    Compensation(String),
}

impl CallbackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallbackError::OrderNotFound(_) | CallbackError::Rejected(_) => ErrorKind::Resource,
            CallbackError::Unavailable(_) => ErrorKind::Transient,
            CallbackError::Compensation(_) => ErrorKind::ConsistencyHazard,
        }
    }
}

/// Errors returned by the settlement worker.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Tendered amount must not be negative, got {0}")]
    InvalidAmount(Money),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Order {order_id} is {status}, only pending orders can be settled")]
    OrderNotPending {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// A payment already exists for the order. Redelivered events end here.
    #[error("Payment {payment_id} already exists for order {order_id}")]
    DuplicatePayment {
        order_id: OrderId,
        payment_id: PaymentId,
    },

    #[error(
        "Insufficient funds for payment {payment_id}: required {required}, tendered {tendered}"
    )]
    InsufficientFunds {
        payment_id: PaymentId,
        required: Money,
        tendered: Money,
    },

    /// The payment write is done but the order could not follow it.
    #[error("Order {order_id} could not be marked {status}: {source}")]
    StatusCallbackFailed {
        order_id: OrderId,
        status: OrderStatus,
        #[source]
        source: CallbackError,
    },

    #[error("Order service error: {0}")]
    OrderService(#[source] CallbackError),

    #[error(transparent)]
    DeadlineExceeded(#[from] DeadlineExceeded),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::InvalidAmount(_) => ErrorKind::Validation,
            SettlementError::PaymentNotFound(_)
            | SettlementError::OrderNotFound(_)
            | SettlementError::OrderNotPending { .. }
            | SettlementError::DuplicatePayment { .. }
            | SettlementError::InsufficientFunds { .. } => ErrorKind::Resource,
            SettlementError::StatusCallbackFailed { .. } => ErrorKind::ConsistencyHazard,
            SettlementError::OrderService(e) => e.kind(),
            SettlementError::DeadlineExceeded(_) => ErrorKind::Transient,
            SettlementError::Ledger(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
