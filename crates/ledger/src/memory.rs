//! In-memory ledgers for tests and single-process runs.
//!
//! Each ledger keeps its rows behind one mutex, so every operation is atomic
//! with respect to the others, matching the row-level guarantees of the
//! PostgreSQL backends. Failure switches let tests inject outages.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, ProductId, UserId};

use crate::model::{order_transition, page_offset, payment_transition};
use crate::{
    CatalogStore, LedgerError, NewOrder, NewPayment, NewProduct, Order, OrderLedger, OrderLine,
    OrderStatus, PAGE_SIZE, Payment, PaymentLedger, PaymentStatus, Product, ProductUpdate, Result,
    Transition,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn page<T: Clone>(rows: impl Iterator<Item = T>, page: u32) -> Vec<T> {
    rows.skip(page_offset(page) as usize)
        .take(PAGE_SIZE as usize)
        .collect()
}

async fn simulate_latency(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    products: BTreeMap<ProductId, Product>,
    next_id: i64,
    unavailable: bool,
    failing_decrements: HashSet<ProductId>,
    fail_on_restore: bool,
    delay: Option<Duration>,
}

/// In-memory catalog store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        guard(&self.state).unavailable = unavailable;
    }

    /// Makes decrements of one product fail with `Unavailable`.
    pub fn fail_decrement_for(&self, id: ProductId) {
        guard(&self.state).failing_decrements.insert(id);
    }

    /// Makes every stock restore fail with `Unavailable`.
    pub fn set_fail_on_restore(&self, fail: bool) {
        guard(&self.state).fail_on_restore = fail;
    }

    /// Delays every operation, for deadline tests.
    pub fn set_delay(&self, delay: Option<Duration>) {
        guard(&self.state).delay = delay;
    }

    /// Returns the current stock of a product.
    pub fn stock_of(&self, id: ProductId) -> Option<u32> {
        guard(&self.state).products.get(&id).map(|p| p.stock)
    }

    fn check_available(state: &CatalogState) -> Result<()> {
        if state.unavailable {
            return Err(LedgerError::Unavailable("catalog store is down".into()));
        }
        Ok(())
    }

    fn delay(&self) -> Option<Duration> {
        guard(&self.state).delay
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        simulate_latency(self.delay()).await;
        let state = guard(&self.state);
        Self::check_available(&state)?;
        Ok(state.products.get(&id).cloned())
    }

    async fn list_products(&self, page_number: u32) -> Result<Vec<Product>> {
        simulate_latency(self.delay()).await;
        let state = guard(&self.state);
        Self::check_available(&state)?;
        Ok(page(state.products.values().rev().cloned(), page_number))
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        product.validate()?;
        let mut state = guard(&self.state);
        Self::check_available(&state)?;

        state.next_id += 1;
        let now = Utc::now();
        let product = Product {
            id: ProductId::new(state.next_id),
            name: product.name,
            description: product.description,
            unit_price: product.unit_price,
            stock: product.stock,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        update.validate()?;
        let mut state = guard(&self.state);
        Self::check_available(&state)?;

        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| LedgerError::product_not_found(id))?;
        if let Some(name) = update.name() {
            product.name = name.to_string();
        }
        if let Some(description) = update.description() {
            product.description = description.to_string();
        }
        if let Some(price) = update.unit_price {
            product.unit_price = price;
        }
        if let Some(stock) = update.stock {
            product.stock = stock;
        }
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn delete_product(&self, id: ProductId) -> Result<()> {
        let mut state = guard(&self.state);
        Self::check_available(&state)?;
        state
            .products
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::product_not_found(id))
    }

    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<u32> {
        simulate_latency(self.delay()).await;
        let mut state = guard(&self.state);
        Self::check_available(&state)?;
        if state.failing_decrements.contains(&id) {
            return Err(LedgerError::Unavailable(format!(
                "stock decrement for product {id} failed"
            )));
        }

        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| LedgerError::product_not_found(id))?;
        if product.stock < quantity {
            return Err(LedgerError::InsufficientStock {
                product_id: id,
                requested: quantity,
                available: product.stock,
            });
        }
        product.stock -= quantity;
        product.updated_at = Utc::now();
        Ok(product.stock)
    }

    async fn restore_stock(&self, id: ProductId, quantity: u32) -> Result<u32> {
        let mut state = guard(&self.state);
        Self::check_available(&state)?;
        if state.fail_on_restore {
            return Err(LedgerError::Unavailable(format!(
                "stock restore for product {id} failed"
            )));
        }

        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| LedgerError::product_not_found(id))?;
        product.stock = product.stock.checked_add(quantity).ok_or_else(|| {
            LedgerError::Validation(format!("stock overflow for product {id}"))
        })?;
        product.updated_at = Utc::now();
        Ok(product.stock)
    }
}

#[derive(Debug, Default)]
struct OrderState {
    orders: BTreeMap<OrderId, Order>,
    next_id: i64,
    fail_on_create: bool,
    fail_on_update: bool,
    unavailable: bool,
    delay: Option<Duration>,
}

/// In-memory order ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderLedger {
    state: Arc<Mutex<OrderState>>,
}

impl InMemoryOrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next order inserts fail with `Unavailable`.
    pub fn set_fail_on_create(&self, fail: bool) {
        guard(&self.state).fail_on_create = fail;
    }

    /// Makes status updates fail with `Unavailable`.
    pub fn set_fail_on_update(&self, fail: bool) {
        guard(&self.state).fail_on_update = fail;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        guard(&self.state).unavailable = unavailable;
    }

    /// Delays every read by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        guard(&self.state).delay = delay;
    }

    /// Returns the number of stored orders.
    pub fn order_count(&self) -> usize {
        guard(&self.state).orders.len()
    }

    /// Back-dates an order, for reconciliation tests.
    pub fn set_created_at(&self, id: OrderId, created_at: DateTime<Utc>) {
        if let Some(order) = guard(&self.state).orders.get_mut(&id) {
            order.created_at = created_at;
        }
    }

    fn check_available(state: &OrderState) -> Result<()> {
        if state.unavailable {
            return Err(LedgerError::Unavailable("order ledger is down".into()));
        }
        Ok(())
    }

    fn delay(&self) -> Option<Duration> {
        guard(&self.state).delay
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn create_order(&self, order: NewOrder) -> Result<Order> {
        order.validate()?;
        let mut state = guard(&self.state);
        Self::check_available(&state)?;
        if state.fail_on_create {
            return Err(LedgerError::Unavailable("order insert failed".into()));
        }

        state.next_id += 1;
        let id = OrderId::new(state.next_id);
        let now = Utc::now();
        let order = Order {
            id,
            user_id: order.user_id,
            total_price: order.total_price,
            status: OrderStatus::Pending,
            lines: order
                .lines
                .into_iter()
                .map(|line| OrderLine {
                    order_id: id,
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        simulate_latency(self.delay()).await;
        let state = guard(&self.state);
        Self::check_available(&state)?;
        Ok(state.orders.get(&id).cloned())
    }

    async fn list_orders(&self, user_id: Option<UserId>, page_number: u32) -> Result<Vec<Order>> {
        simulate_latency(self.delay()).await;
        let state = guard(&self.state);
        Self::check_available(&state)?;
        let rows = state
            .orders
            .values()
            .rev()
            .filter(|o| user_id.is_none_or(|user| o.user_id == user))
            .cloned();
        Ok(page(rows, page_number))
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>> {
        simulate_latency(self.delay()).await;
        let state = guard(&self.state);
        Self::check_available(&state)?;
        let mut stale: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|o| (o.created_at, o.id));
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Transition<Order>> {
        let mut state = guard(&self.state);
        Self::check_available(&state)?;
        if state.fail_on_update {
            return Err(LedgerError::Unavailable("order status update failed".into()));
        }

        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| LedgerError::order_not_found(id))?;
        if !order_transition(id, order.status, status)? {
            return Ok(Transition::Unchanged(order.clone()));
        }
        order.status = status;
        order.updated_at = Utc::now();
        Ok(Transition::Applied(order.clone()))
    }
}

#[derive(Debug, Default)]
struct PaymentState {
    payments: BTreeMap<PaymentId, Payment>,
    next_id: i64,
    fail_on_update: bool,
    unavailable: bool,
}

/// In-memory payment ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentLedger {
    state: Arc<Mutex<PaymentState>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes status updates fail with `Unavailable`.
    pub fn set_fail_on_update(&self, fail: bool) {
        guard(&self.state).fail_on_update = fail;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        guard(&self.state).unavailable = unavailable;
    }

    /// Returns the number of stored payments.
    pub fn payment_count(&self) -> usize {
        guard(&self.state).payments.len()
    }

    fn check_available(state: &PaymentState) -> Result<()> {
        if state.unavailable {
            return Err(LedgerError::Unavailable("payment ledger is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn create_payment(&self, payment: NewPayment) -> Result<Payment> {
        let mut state = guard(&self.state);
        Self::check_available(&state)?;

        if let Some(existing) = state
            .payments
            .values()
            .find(|p| p.order_id == payment.order_id)
        {
            return Err(LedgerError::DuplicatePayment {
                order_id: payment.order_id,
                payment_id: existing.id,
            });
        }

        state.next_id += 1;
        let now = Utc::now();
        let payment = Payment {
            id: PaymentId::new(state.next_id),
            order_id: payment.order_id,
            user_id: payment.user_id,
            total_price: payment.total_price,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let state = guard(&self.state);
        Self::check_available(&state)?;
        Ok(state.payments.get(&id).cloned())
    }

    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let state = guard(&self.state);
        Self::check_available(&state)?;
        Ok(state
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn list_payments(&self, page_number: u32) -> Result<Vec<Payment>> {
        let state = guard(&self.state);
        Self::check_available(&state)?;
        Ok(page(state.payments.values().rev().cloned(), page_number))
    }

    async fn update_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
    ) -> Result<Transition<Payment>> {
        let mut state = guard(&self.state);
        Self::check_available(&state)?;
        if state.fail_on_update {
            return Err(LedgerError::Unavailable(
                "payment status update failed".into(),
            ));
        }

        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| LedgerError::payment_not_found(id))?;
        if !payment_transition(id, payment.status, status)? {
            return Ok(Transition::Unchanged(payment.clone()));
        }
        payment.status = status;
        payment.updated_at = Utc::now();
        Ok(Transition::Applied(payment.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;

    fn widget(stock: u32) -> NewProduct {
        NewProduct {
            name: "Widget".into(),
            description: "A widget".into(),
            unit_price: Money::from_cents(1000),
            stock,
        }
    }

    #[tokio::test]
    async fn test_decrement_and_restore() {
        let catalog = InMemoryCatalog::new();
        let product = catalog.create_product(widget(5)).await.unwrap();

        assert_eq!(catalog.decrement_stock(product.id, 3).await.unwrap(), 2);
        assert_eq!(catalog.restore_stock(product.id, 3).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_decrement_rejects_oversell() {
        let catalog = InMemoryCatalog::new();
        let product = catalog.create_product(widget(2)).await.unwrap();

        let err = catalog.decrement_stock(product.id, 3).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        ));
        assert_eq!(catalog.stock_of(product.id), Some(2));
    }

    #[tokio::test]
    async fn test_decrement_unknown_product() {
        let catalog = InMemoryCatalog::new();
        let err = catalog
            .decrement_stock(ProductId::new(99), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "product", .. }));
    }

    #[tokio::test]
    async fn test_update_product_keeps_blank_fields() {
        let catalog = InMemoryCatalog::new();
        let product = catalog.create_product(widget(1)).await.unwrap();

        let updated = catalog
            .update_product(
                product.id,
                ProductUpdate {
                    name: Some(String::new()),
                    stock: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Widget");
        assert_eq!(updated.stock, 10);
    }

    #[tokio::test]
    async fn test_list_products_pages_newest_first() {
        let catalog = InMemoryCatalog::new();
        for _ in 0..(PAGE_SIZE + 2) {
            catalog.create_product(widget(1)).await.unwrap();
        }

        let first = catalog.list_products(1).await.unwrap();
        let second = catalog.list_products(2).await.unwrap();
        assert_eq!(first.len(), PAGE_SIZE as usize);
        assert_eq!(second.len(), 2);
        assert_eq!(first[0].id, ProductId::new(i64::from(PAGE_SIZE) + 2));
        assert_eq!(second[1].id, ProductId::new(1));
    }

    #[tokio::test]
    async fn test_delete_missing_product() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.delete_product(ProductId::new(1)).await.is_err());
    }

    fn one_line_order(user: i64) -> NewOrder {
        NewOrder {
            user_id: UserId::new(user),
            total_price: Money::from_cents(3000),
            lines: vec![crate::NewOrderLine {
                product_id: ProductId::new(1),
                quantity: 3,
                unit_price: Money::from_cents(1000),
            }],
        }
    }

    #[tokio::test]
    async fn test_order_status_is_terminal_and_idempotent() {
        let ledger = InMemoryOrderLedger::new();
        let order = ledger.create_order(one_line_order(1)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.lines[0].order_id, order.id);

        let first = ledger
            .update_status(order.id, OrderStatus::Paid)
            .await
            .unwrap();
        assert!(first.was_applied());

        let replay = ledger
            .update_status(order.id, OrderStatus::Paid)
            .await
            .unwrap();
        assert!(!replay.was_applied());

        let flip = ledger.update_status(order.id, OrderStatus::Failed).await;
        assert!(matches!(flip, Err(LedgerError::InvalidTransition { .. })));

        let stored = ledger.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_list_orders_by_user() {
        let ledger = InMemoryOrderLedger::new();
        ledger.create_order(one_line_order(1)).await.unwrap();
        ledger.create_order(one_line_order(2)).await.unwrap();
        ledger.create_order(one_line_order(1)).await.unwrap();

        let mine = ledger.list_orders(Some(UserId::new(1)), 1).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|o| o.user_id == UserId::new(1)));
        assert_eq!(ledger.list_orders(None, 1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_stale_pending() {
        let ledger = InMemoryOrderLedger::new();
        let old = ledger.create_order(one_line_order(1)).await.unwrap();
        let paid = ledger.create_order(one_line_order(1)).await.unwrap();
        ledger.create_order(one_line_order(1)).await.unwrap();

        let long_ago = Utc::now() - chrono::Duration::hours(1);
        ledger.set_created_at(old.id, long_ago);
        ledger.set_created_at(paid.id, long_ago);
        ledger
            .update_status(paid.id, OrderStatus::Paid)
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        let stale = ledger.list_stale_pending(cutoff, 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[tokio::test]
    async fn test_one_payment_per_order() {
        let ledger = InMemoryPaymentLedger::new();
        let new_payment = NewPayment {
            order_id: OrderId::new(1),
            user_id: UserId::new(1),
            total_price: Money::from_cents(3000),
        };

        let first = ledger.create_payment(new_payment.clone()).await.unwrap();
        let err = ledger.create_payment(new_payment).await.unwrap_err();
        match err {
            LedgerError::DuplicatePayment { payment_id, .. } => assert_eq!(payment_id, first.id),
            other => panic!("expected DuplicatePayment, got {other:?}"),
        }
        assert_eq!(ledger.payment_count(), 1);
        assert_eq!(
            ledger
                .get_payment_for_order(OrderId::new(1))
                .await
                .unwrap()
                .unwrap()
                .id,
            first.id
        );
    }

    #[tokio::test]
    async fn test_unavailable_switch() {
        let ledger = InMemoryPaymentLedger::new();
        ledger.set_unavailable(true);
        let err = ledger.get_payment(PaymentId::new(1)).await.unwrap_err();
        assert_eq!(err.kind(), common::ErrorKind::Transient);
    }
}
