//! The worker's view of the order service.

use std::sync::Arc;

use async_trait::async_trait;
use channel::Broker;
use common::{ErrorKind, OrderId, RequestContext};
use fulfillment::{FulfillmentError, OrderCoordinator};
use ledger::{CatalogStore, Order, OrderLedger, OrderStatus};

use crate::error::CallbackError;

/// Reads orders and drives them to a terminal status.
///
/// The worker owns payments only; every order change goes through this
/// callback so the order service can apply its own compensation.
#[async_trait]
pub trait OrderStatusClient: Send + Sync {
    async fn get_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
    ) -> Result<Order, CallbackError>;

    /// Moves the order to `status`. Repeating the current terminal status succeeds.
    async fn update_status(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, CallbackError>;
}

impl From<FulfillmentError> for CallbackError {
    fn from(error: FulfillmentError) -> Self {
        if let FulfillmentError::OrderNotFound(id) = error {
            return CallbackError::OrderNotFound(id);
        }
        match error.kind() {
            ErrorKind::Transient => CallbackError::Unavailable(error.to_string()),
            ErrorKind::ConsistencyHazard => CallbackError::Compensation(error.to_string()),
            ErrorKind::Validation | ErrorKind::Resource => {
                CallbackError::Rejected(error.to_string())
            }
        }
    }
}

#[async_trait]
impl<C, O, B> OrderStatusClient for OrderCoordinator<C, O, B>
where
    C: CatalogStore,
    O: OrderLedger,
    B: Broker,
{
    async fn get_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
    ) -> Result<Order, CallbackError> {
        Ok(OrderCoordinator::get_order(self, ctx, order_id).await?)
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, CallbackError> {
        Ok(self
            .update_order_status(ctx, order_id, status)
            .await?
            .into_inner())
    }
}

#[async_trait]
impl<T: OrderStatusClient + ?Sized> OrderStatusClient for Arc<T> {
    async fn get_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
    ) -> Result<Order, CallbackError> {
        (**self).get_order(ctx, order_id).await
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, CallbackError> {
        (**self).update_status(ctx, order_id, status).await
    }
}
