use common::{ErrorKind, OrderId, PaymentId, ProductId};
use thiserror::Error;

/// Errors that can occur when interacting with a ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No record with the given id exists.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// A conditional stock decrement was rejected.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// A payment already exists for the order.
    #[error("Payment {payment_id} already exists for order {order_id}")]
    DuplicatePayment {
        order_id: OrderId,
        payment_id: PaymentId,
    },

    /// The record is in a terminal status that cannot move to the requested one.
    #[error("Invalid {entity} status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        from: &'static str,
        to: &'static str,
    },

    /// The input violates a storage invariant.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The backend could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    pub(crate) fn product_not_found(id: ProductId) -> Self {
        LedgerError::NotFound {
            entity: "product",
            id: id.as_i64(),
        }
    }

    pub(crate) fn order_not_found(id: OrderId) -> Self {
        LedgerError::NotFound {
            entity: "order",
            id: id.as_i64(),
        }
    }

    pub(crate) fn payment_not_found(id: PaymentId) -> Self {
        LedgerError::NotFound {
            entity: "payment",
            id: id.as_i64(),
        }
    }

    /// Classifies the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotFound { .. }
            | LedgerError::InsufficientStock { .. }
            | LedgerError::DuplicatePayment { .. }
            | LedgerError::InvalidTransition { .. } => ErrorKind::Resource,
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::Unavailable(_)
            | LedgerError::Database(_)
            | LedgerError::Migration(_) => ErrorKind::Transient,
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
