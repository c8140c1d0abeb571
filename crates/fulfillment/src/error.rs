use channel::ChannelError;
use common::{DeadlineExceeded, ErrorKind, Money, OrderId, ProductId};
use ledger::LedgerError;
use thiserror::Error;

/// Errors returned by the order coordinator and the reconciler.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("Order has no line items")]
    EmptyOrder,

    #[error("Quantity for product {0} must be greater than 0")]
    InvalidQuantity(ProductId),

    /// The caller offered less than the catalog price for a line.
    #[error(
        "Price mismatch for product {product_id}: expected at least {expected}, offered {offered}"
    )]
    PriceMismatch {
        product_id: ProductId,
        expected: Money,
        offered: Money,
    },

    #[error("Order total overflows")]
    TotalOverflow,

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Stock taken by an earlier step could not be given back.
    #[error("Stock restore failed for products {products:?} after: {cause}")]
    CompensationFailed {
        cause: String,
        products: Vec<ProductId>,
    },

    #[error(transparent)]
    DeadlineExceeded(#[from] DeadlineExceeded),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl FulfillmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FulfillmentError::EmptyOrder
            | FulfillmentError::InvalidQuantity(_)
            | FulfillmentError::PriceMismatch { .. }
            | FulfillmentError::TotalOverflow => ErrorKind::Validation,
            FulfillmentError::ProductNotFound(_)
            | FulfillmentError::InsufficientStock { .. }
            | FulfillmentError::OrderNotFound(_) => ErrorKind::Resource,
            FulfillmentError::CompensationFailed { .. } => ErrorKind::ConsistencyHazard,
            FulfillmentError::DeadlineExceeded(_) => ErrorKind::Transient,
            FulfillmentError::Ledger(e) => e.kind(),
            FulfillmentError::Channel(e) => e.kind(),
        }
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            FulfillmentError::EmptyOrder => "empty_order",
            FulfillmentError::InvalidQuantity(_) => "invalid_quantity",
            FulfillmentError::PriceMismatch { .. } => "price_mismatch",
            FulfillmentError::TotalOverflow => "total_overflow",
            FulfillmentError::ProductNotFound(_) => "product_not_found",
            FulfillmentError::InsufficientStock { .. } => "insufficient_stock",
            FulfillmentError::OrderNotFound(_) => "order_not_found",
            FulfillmentError::CompensationFailed { .. } => "compensation_failed",
            FulfillmentError::DeadlineExceeded(_) => "deadline_exceeded",
            FulfillmentError::Ledger(_) => "ledger",
            FulfillmentError::Channel(_) => "channel",
        }
    }
}

pub type Result<T> = std::result::Result<T, FulfillmentError>;
