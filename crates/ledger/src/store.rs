use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, ProductId, UserId};

use crate::{
    NewOrder, NewPayment, NewProduct, Order, OrderStatus, Payment, PaymentStatus, Product,
    ProductUpdate, Result, Transition,
};

/// Stock and pricing records owned by the catalog service.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Point lookup. Returns None if the product doesn't exist.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Lists products newest first, [`PAGE_SIZE`](crate::PAGE_SIZE) per 1-based page.
    async fn list_products(&self, page: u32) -> Result<Vec<Product>>;

    async fn create_product(&self, product: NewProduct) -> Result<Product>;

    /// Applies an administrative update and returns the stored product.
    async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product>;

    async fn delete_product(&self, id: ProductId) -> Result<()>;

    /// Atomically removes `quantity` units if at least that many are in stock.
    ///
    /// Fails with `InsufficientStock` without touching the row otherwise, so
    /// concurrent checkouts can never both take the last unit.
    /// Returns the remaining stock.
    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<u32>;

    /// Adds `quantity` units back. Used to compensate an earlier decrement.
    /// Returns the resulting stock.
    async fn restore_stock(&self, id: ProductId, quantity: u32) -> Result<u32>;
}

/// Orders and their lines, owned by the order service.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Inserts a pending order and all its lines in one local transaction.
    async fn create_order(&self, order: NewOrder) -> Result<Order>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists orders newest first, optionally restricted to one user.
    async fn list_orders(&self, user_id: Option<UserId>, page: u32) -> Result<Vec<Order>>;

    /// Orders still pending that were created before `older_than`, oldest first.
    async fn list_stale_pending(&self, older_than: DateTime<Utc>, limit: u32)
    -> Result<Vec<Order>>;

    /// Moves an order to a terminal status.
    ///
    /// Repeating the current terminal status returns `Transition::Unchanged`;
    /// any other move out of a terminal status fails with `InvalidTransition`.
    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Transition<Order>>;
}

/// Payment records, owned by the payment service.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Creates a pending payment.
    ///
    /// At most one payment exists per order; a second attempt fails with
    /// `DuplicatePayment` carrying the existing payment id.
    async fn create_payment(&self, payment: NewPayment) -> Result<Payment>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    async fn list_payments(&self, page: u32) -> Result<Vec<Payment>>;

    /// Moves a pending payment to a terminal status, with the same replay
    /// semantics as [`OrderLedger::update_status`].
    async fn update_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
    ) -> Result<Transition<Payment>>;
}

#[async_trait]
impl<T: CatalogStore + ?Sized> CatalogStore for Arc<T> {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        (**self).get_product(id).await
    }

    async fn list_products(&self, page: u32) -> Result<Vec<Product>> {
        (**self).list_products(page).await
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        (**self).create_product(product).await
    }

    async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        (**self).update_product(id, update).await
    }

    async fn delete_product(&self, id: ProductId) -> Result<()> {
        (**self).delete_product(id).await
    }

    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<u32> {
        (**self).decrement_stock(id, quantity).await
    }

    async fn restore_stock(&self, id: ProductId, quantity: u32) -> Result<u32> {
        (**self).restore_stock(id, quantity).await
    }
}

#[async_trait]
impl<T: OrderLedger + ?Sized> OrderLedger for Arc<T> {
    async fn create_order(&self, order: NewOrder) -> Result<Order> {
        (**self).create_order(order).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        (**self).get_order(id).await
    }

    async fn list_orders(&self, user_id: Option<UserId>, page: u32) -> Result<Vec<Order>> {
        (**self).list_orders(user_id, page).await
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>> {
        (**self).list_stale_pending(older_than, limit).await
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Transition<Order>> {
        (**self).update_status(id, status).await
    }
}

#[async_trait]
impl<T: PaymentLedger + ?Sized> PaymentLedger for Arc<T> {
    async fn create_payment(&self, payment: NewPayment) -> Result<Payment> {
        (**self).create_payment(payment).await
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        (**self).get_payment(id).await
    }

    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        (**self).get_payment_for_order(order_id).await
    }

    async fn list_payments(&self, page: u32) -> Result<Vec<Payment>> {
        (**self).list_payments(page).await
    }

    async fn update_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
    ) -> Result<Transition<Payment>> {
        (**self).update_status(id, status).await
    }
}
