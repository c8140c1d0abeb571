//! Order fulfillment.
//!
//! [`OrderCoordinator`] turns an order request into a pending order: it prices
//! lines against the catalog, reserves stock with conditional decrements,
//! persists the order and announces it for settlement. It also applies
//! settlement outcomes, giving stock back when an order fails.
//! [`Reconciler`] re-announces pending orders whose announcement was lost.

pub mod coordinator;
pub mod error;
pub mod reconciler;

pub use coordinator::{
    CoordinatorConfig, DEFAULT_ORDER_TOPIC, FulfillmentWarning, LineItem, OrderCoordinator,
    OrderRequest, PlacedOrder, order_created_event,
};
pub use error::{FulfillmentError, Result};
pub use reconciler::{ReconcileReport, Reconciler, ReconcilerConfig};
