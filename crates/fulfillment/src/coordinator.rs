//! Order fulfillment coordinator.
//!
//! Placing an order spans the catalog and the order ledger with no shared
//! transaction, so the coordinator runs it as a short manual saga:
//!
//! 1. price every line against the catalog (nothing is written yet)
//! 2. take stock with one conditional decrement per line
//! 3. persist the order and its lines in one ledger transaction
//! 4. announce the order on the event channel
//!
//! A failure in step 2 or 3 gives back every decrement already applied.
//! A failure in step 4 is reported as a warning: the order stays pending
//! and the reconciler announces it later.

use std::time::Duration;

use channel::{Broker, EventProducer, OrderCreatedEvent, OrderLineRecord};
use common::{DEFAULT_CALL_TIMEOUT, Money, OrderId, ProductId, RequestContext, UserId};
use ledger::{
    CatalogStore, LedgerError, NewOrder, NewOrderLine, Order, OrderLedger, OrderStatus, Transition,
};
use serde::{Deserialize, Serialize};

use crate::{FulfillmentError, Result};

pub const DEFAULT_ORDER_TOPIC: &str = "order.created";

/// One requested line. `price` is what the caller agreed to pay for the
/// whole line, not per unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub items: Vec<LineItem>,
}

/// Non-fatal condition attached to a successfully placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FulfillmentWarning {
    /// The order is persisted but settlement was not triggered yet.
    SettlementDeferred { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    #[serde(flatten)]
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<FulfillmentWarning>,
}

impl PlacedOrder {
    pub fn is_settlement_deferred(&self) -> bool {
        matches!(
            self.warning,
            Some(FulfillmentWarning::SettlementDeferred { .. })
        )
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Topic the order-created event goes to.
    pub topic: String,
    /// Bound on each stock restore. Restores get their own budget so they
    /// still run when the request deadline is what failed.
    pub compensation_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_ORDER_TOPIC.to_string(),
            compensation_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Builds the event announcing a persisted order.
pub fn order_created_event(order: &Order) -> OrderCreatedEvent {
    let lines = order
        .lines
        .iter()
        .map(|line| OrderLineRecord {
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
        })
        .collect();
    OrderCreatedEvent::new(order.id, order.user_id, order.total_price, lines)
}

#[derive(Debug, Clone, Copy)]
struct PricedLine {
    product_id: ProductId,
    quantity: u32,
    unit_price: Money,
}

/// Validates, reserves and persists orders, and applies settlement outcomes.
pub struct OrderCoordinator<C, O, B> {
    catalog: C,
    orders: O,
    producer: EventProducer<B>,
    config: CoordinatorConfig,
}

impl<C, O, B> OrderCoordinator<C, O, B>
where
    C: CatalogStore,
    O: OrderLedger,
    B: Broker,
{
    pub fn new(catalog: C, orders: O, producer: EventProducer<B>) -> Self {
        Self::with_config(catalog, orders, producer, CoordinatorConfig::default())
    }

    pub fn with_config(
        catalog: C,
        orders: O,
        producer: EventProducer<B>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            catalog,
            orders,
            producer,
            config,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Places an order.
    ///
    /// Returns the pending order. Stock is only left reserved when the order
    /// row exists; every rejection after a decrement restores what was taken.
    #[tracing::instrument(
        skip(self, ctx, request),
        fields(user_id = %request.user_id, lines = request.items.len())
    )]
    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        request: OrderRequest,
    ) -> Result<PlacedOrder> {
        let started = std::time::Instant::now();
        let result = self.place(ctx, request).await;

        match &result {
            Ok(placed) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(
                    order_id = %placed.order.id,
                    total = %placed.order.total_price,
                    deferred = placed.is_settlement_deferred(),
                    "order placed"
                );
            }
            Err(e) => {
                metrics::counter!("orders_rejected_total", "reason" => e.reason()).increment(1);
                tracing::info!(error = %e, "order rejected");
            }
        }
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn place(&self, ctx: &RequestContext, request: OrderRequest) -> Result<PlacedOrder> {
        let (lines, total) = self.price_lines(ctx, &request.items).await?;
        self.reserve_stock(ctx, &lines).await?;

        let new_order = NewOrder {
            user_id: request.user_id,
            total_price: total,
            lines: lines
                .iter()
                .map(|line| NewOrderLine {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
        };

        let order = match ctx.bound(self.orders.create_order(new_order)).await {
            Ok(Ok(order)) => order,
            Ok(Err(e)) => return Err(self.compensate(&lines, e.into()).await),
            Err(deadline) => return Err(self.compensate(&lines, deadline.into()).await),
        };

        let warning = self.announce(ctx, &order).await;
        Ok(PlacedOrder { order, warning })
    }

    /// Checks every line against the catalog and returns the priced lines
    /// with the order total. Writes nothing.
    async fn price_lines(
        &self,
        ctx: &RequestContext,
        items: &[LineItem],
    ) -> Result<(Vec<PricedLine>, Money)> {
        if items.is_empty() {
            return Err(FulfillmentError::EmptyOrder);
        }

        let mut total = Money::zero();
        let mut lines = Vec::with_capacity(items.len());

        for item in items {
            if item.quantity == 0 {
                return Err(FulfillmentError::InvalidQuantity(item.product_id));
            }

            let product = ctx
                .bound(self.catalog.get_product(item.product_id))
                .await??
                .ok_or(FulfillmentError::ProductNotFound(item.product_id))?;

            if item.quantity > product.stock {
                return Err(FulfillmentError::InsufficientStock {
                    product_id: product.id,
                    requested: item.quantity,
                    available: product.stock,
                });
            }

            let line_total = product
                .unit_price
                .checked_mul(item.quantity)
                .ok_or(FulfillmentError::TotalOverflow)?;
            if item.price < line_total {
                return Err(FulfillmentError::PriceMismatch {
                    product_id: product.id,
                    expected: line_total,
                    offered: item.price,
                });
            }
            total = total
                .checked_add(line_total)
                .ok_or(FulfillmentError::TotalOverflow)?;

            lines.push(PricedLine {
                product_id: product.id,
                quantity: item.quantity,
                unit_price: product.unit_price,
            });
        }

        Ok((lines, total))
    }

    /// Applies one conditional decrement per line, restoring the applied
    /// prefix if any of them fails.
    async fn reserve_stock(&self, ctx: &RequestContext, lines: &[PricedLine]) -> Result<()> {
        for (index, line) in lines.iter().enumerate() {
            let outcome = ctx
                .bound(self.catalog.decrement_stock(line.product_id, line.quantity))
                .await;

            let error = match outcome {
                Ok(Ok(remaining)) => {
                    tracing::debug!(product_id = %line.product_id, remaining, "stock reserved");
                    continue;
                }
                Ok(Err(LedgerError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                })) => FulfillmentError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                },
                Ok(Err(LedgerError::NotFound { .. })) => {
                    FulfillmentError::ProductNotFound(line.product_id)
                }
                Ok(Err(e)) => e.into(),
                Err(deadline) => deadline.into(),
            };

            return Err(self.compensate(&lines[..index], error).await);
        }
        Ok(())
    }

    /// Gives back `reserved` and returns the error the caller should see.
    async fn compensate(
        &self,
        reserved: &[PricedLine],
        cause: FulfillmentError,
    ) -> FulfillmentError {
        if reserved.is_empty() {
            return cause;
        }

        let restores = reserved
            .iter()
            .rev()
            .map(|line| (line.product_id, line.quantity))
            .collect();
        let failed = self.restore_stock(restores).await;

        if failed.is_empty() {
            tracing::info!(
                restored = reserved.len(),
                cause = %cause,
                "stock reservation rolled back"
            );
            cause
        } else {
            FulfillmentError::CompensationFailed {
                cause: cause.to_string(),
                products: failed,
            }
        }
    }

    /// Restores each `(product, quantity)` pair and returns the products whose
    /// restore failed.
    async fn restore_stock(&self, restores: Vec<(ProductId, u32)>) -> Vec<ProductId> {
        let mut failed = Vec::new();

        for (product_id, quantity) in restores {
            let outcome = tokio::time::timeout(
                self.config.compensation_timeout,
                self.catalog.restore_stock(product_id, quantity),
            )
            .await;

            let error = match outcome {
                Ok(Ok(stock)) => {
                    metrics::counter!("stock_compensations_total").increment(1);
                    tracing::debug!(%product_id, quantity, stock, "stock restored");
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "restore timed out after {:?}",
                    self.config.compensation_timeout
                ),
            };

            metrics::counter!("consistency_hazards_total", "kind" => "stock_restore").increment(1);
            tracing::error!(
                target: "consistency",
                %product_id,
                quantity,
                error = %error,
                "stock restore failed, stock is under-counted"
            );
            failed.push(product_id);
        }

        failed
    }

    /// Publishes the order-created event. Returns a warning instead of an
    /// error: the order is already committed.
    async fn announce(&self, ctx: &RequestContext, order: &Order) -> Option<FulfillmentWarning> {
        let event = order_created_event(order);
        let outcome = match ctx
            .bound(self.producer.publish_event(&self.config.topic, &event))
            .await
        {
            Ok(result) => result.map_err(FulfillmentError::from),
            Err(deadline) => Err(deadline.into()),
        };

        match outcome {
            Ok(receipt) => {
                tracing::debug!(
                    order_id = %order.id,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "order announced"
                );
                None
            }
            Err(e) => {
                metrics::counter!("settlement_deferred_total").increment(1);
                metrics::counter!("consistency_hazards_total", "kind" => "publish_after_commit")
                    .increment(1);
                tracing::error!(
                    target: "consistency",
                    order_id = %order.id,
                    error = %e,
                    "order committed but not announced, settlement deferred"
                );
                Some(FulfillmentWarning::SettlementDeferred {
                    reason: e.to_string(),
                })
            }
        }
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn get_order(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order> {
        ctx.bound(self.orders.get_order(order_id))
            .await??
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn list_orders(
        &self,
        ctx: &RequestContext,
        user_id: Option<UserId>,
        page: u32,
    ) -> Result<Vec<Order>> {
        Ok(ctx.bound(self.orders.list_orders(user_id, page)).await??)
    }

    /// Applies a settlement outcome to an order.
    ///
    /// Repeating the current terminal status is a no-op. The first move to
    /// `failed` gives the order's stock back, exactly once.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn update_order_status(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Transition<Order>> {
        let transition = match ctx.bound(self.orders.update_status(order_id, status)).await? {
            Ok(transition) => transition,
            Err(LedgerError::NotFound { .. }) => {
                return Err(FulfillmentError::OrderNotFound(order_id));
            }
            Err(e) => return Err(e.into()),
        };

        if let Transition::Applied(order) = &transition {
            tracing::info!(%order_id, status = %order.status, "order status updated");

            if order.status == OrderStatus::Failed {
                let restores = order
                    .lines
                    .iter()
                    .map(|line| (line.product_id, line.quantity))
                    .collect();
                let failed = self.restore_stock(restores).await;
                if !failed.is_empty() {
                    return Err(FulfillmentError::CompensationFailed {
                        cause: format!("order {order_id} failed"),
                        products: failed,
                    });
                }
            }
        }

        Ok(transition)
    }
}
