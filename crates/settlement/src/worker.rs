//! Payment settlement.
//!
//! Settling an order is two calls. [`SettlementWorker::settle`] opens a
//! pending payment for a pending order, at most once per order.
//! [`SettlementWorker::transaction`] checks the tendered funds, writes the
//! payment outcome and then calls back into the order service so the order
//! follows the payment to `paid` or `failed`.
//!
//! The payment write and the order callback are not atomic. When the
//! callback fails after the payment is terminal, the pair is logged as a
//! consistency hazard and the error is returned to the caller.

use std::time::Duration;

use common::{DEFAULT_CALL_TIMEOUT, Money, OrderId, PaymentId, RequestContext, UserId};
use ledger::{
    LedgerError, NewPayment, Order, OrderStatus, Payment, PaymentLedger, PaymentStatus, Transition,
};
use serde::{Deserialize, Serialize};

use crate::error::CallbackError;
use crate::orders::OrderStatusClient;
use crate::{Result, SettlementError};

/// Input of [`SettlementWorker::settle`].
///
/// The order ledger is authoritative: when `user_id` or `total_price`
/// disagree with the stored order, the stored values are used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
}

/// Successful outcome of [`SettlementWorker::transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "payment", rename_all = "snake_case")]
pub enum TransactionOutcome {
    /// The payment and its order are now `paid`.
    Paid(Payment),
    /// The payment was already terminal. Nothing was changed.
    AlreadySettled(Payment),
}

impl TransactionOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            TransactionOutcome::Paid(payment) | TransactionOutcome::AlreadySettled(payment) => {
                payment
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionOutcome::Paid(_) => "paid",
            TransactionOutcome::AlreadySettled(_) => "already_settled",
        }
    }
}

/// Creates payments and settles them against the order service.
pub struct SettlementWorker<P, S> {
    payments: P,
    orders: S,
    callback_timeout: Duration,
}

impl<P, S> SettlementWorker<P, S>
where
    P: PaymentLedger,
    S: OrderStatusClient,
{
    pub fn new(payments: P, orders: S) -> Self {
        Self {
            payments,
            orders,
            callback_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound on each order status callback. Callbacks get their own budget
    /// so an order can still be failed after the request deadline passed.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn payments(&self) -> &P {
        &self.payments
    }

    /// Opens a pending payment for a pending order.
    ///
    /// Fails with [`SettlementError::DuplicatePayment`] when the order
    /// already has a payment, whatever its status.
    #[tracing::instrument(skip(self, ctx, request), fields(order_id = %request.order_id))]
    pub async fn settle(&self, ctx: &RequestContext, request: SettleRequest) -> Result<Payment> {
        if let Some(existing) = ctx
            .bound(self.payments.get_payment_for_order(request.order_id))
            .await??
        {
            return Err(SettlementError::DuplicatePayment {
                order_id: request.order_id,
                payment_id: existing.id,
            });
        }

        let order = self.load_order(ctx, request.order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(SettlementError::OrderNotPending {
                order_id: order.id,
                status: order.status,
            });
        }
        if order.user_id != request.user_id || order.total_price != request.total_price {
            tracing::warn!(
                requested_user = %request.user_id,
                requested_total = %request.total_price,
                stored_user = %order.user_id,
                stored_total = %order.total_price,
                "settle request disagrees with the order ledger, using stored values"
            );
        }

        let new_payment = NewPayment {
            order_id: order.id,
            user_id: order.user_id,
            total_price: order.total_price,
        };
        let payment = match ctx.bound(self.payments.create_payment(new_payment)).await? {
            Ok(payment) => payment,
            Err(LedgerError::DuplicatePayment {
                order_id,
                payment_id,
            }) => {
                return Err(SettlementError::DuplicatePayment {
                    order_id,
                    payment_id,
                });
            }
            Err(e) => return Err(e.into()),
        };

        metrics::counter!("payments_created_total").increment(1);
        tracing::info!(payment_id = %payment.id, total = %payment.total_price, "payment created");
        Ok(payment)
    }

    /// Settles a payment with the amount the buyer tendered.
    ///
    /// A terminal payment comes back as [`TransactionOutcome::AlreadySettled`].
    /// Too little money fails both the payment and the order and returns
    /// [`SettlementError::InsufficientFunds`]. A payment whose order is no
    /// longer pending is refused with [`SettlementError::OrderNotPending`].
    #[tracing::instrument(skip(self, ctx, tendered), fields(tendered = %tendered))]
    pub async fn transaction(
        &self,
        ctx: &RequestContext,
        payment_id: PaymentId,
        tendered: Money,
    ) -> Result<TransactionOutcome> {
        let result = self.settle_payment(ctx, payment_id, tendered).await;

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(SettlementError::InsufficientFunds { .. }) => "insufficient_funds",
            Err(_) => "error",
        };
        metrics::counter!("payment_transactions_total", "outcome" => outcome).increment(1);

        result
    }

    async fn settle_payment(
        &self,
        ctx: &RequestContext,
        payment_id: PaymentId,
        tendered: Money,
    ) -> Result<TransactionOutcome> {
        if tendered.is_negative() {
            return Err(SettlementError::InvalidAmount(tendered));
        }

        let payment = self.get_payment(ctx, payment_id).await?;
        if payment.status.is_terminal() {
            tracing::info!(status = %payment.status, "payment already settled");
            return Ok(TransactionOutcome::AlreadySettled(payment));
        }

        let order = self.load_order(ctx, payment.order_id).await?;
        if order.status != OrderStatus::Pending {
            return self.close_orphaned_payment(ctx, payment, order.status).await;
        }

        if tendered < payment.total_price {
            return self.reject_underpayment(ctx, payment, tendered).await;
        }

        let paid = match self.mark_payment(ctx, payment_id, PaymentStatus::Paid).await {
            Ok(Some(paid)) => paid,
            Ok(None) => {
                let current = self.get_payment(ctx, payment_id).await?;
                return Ok(TransactionOutcome::AlreadySettled(current));
            }
            Err(e) => {
                tracing::warn!(error = %e, "payment update failed, failing the order");
                // A callback failure is logged inside order_callback.
                let _ = self
                    .order_callback(ctx, payment.order_id, OrderStatus::Failed)
                    .await;
                return Err(e);
            }
        };

        self.order_callback(ctx, paid.order_id, OrderStatus::Paid).await?;
        tracing::info!(order_id = %paid.order_id, "payment settled");
        Ok(TransactionOutcome::Paid(paid))
    }

    /// A pending payment whose order has left `pending` is never charged.
    /// When the order failed, the payment is failed with it.
    async fn close_orphaned_payment(
        &self,
        ctx: &RequestContext,
        payment: Payment,
        order_status: OrderStatus,
    ) -> Result<TransactionOutcome> {
        // A concurrent transaction may have settled both records already.
        let current = self.get_payment(ctx, payment.id).await?;
        if current.status.is_terminal() {
            return Ok(TransactionOutcome::AlreadySettled(current));
        }

        tracing::warn!(
            order_id = %payment.order_id,
            %order_status,
            "order is no longer pending, refusing to charge"
        );
        if order_status == OrderStatus::Failed
            && self
                .mark_payment(ctx, payment.id, PaymentStatus::Failed)
                .await?
                .is_none()
        {
            let current = self.get_payment(ctx, payment.id).await?;
            return Ok(TransactionOutcome::AlreadySettled(current));
        }

        Err(SettlementError::OrderNotPending {
            order_id: payment.order_id,
            status: order_status,
        })
    }

    async fn reject_underpayment(
        &self,
        ctx: &RequestContext,
        payment: Payment,
        tendered: Money,
    ) -> Result<TransactionOutcome> {
        match self.mark_payment(ctx, payment.id, PaymentStatus::Failed).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let current = self.get_payment(ctx, payment.id).await?;
                return Ok(TransactionOutcome::AlreadySettled(current));
            }
            // The order is failed even when the payment stays pending.
            Err(e) => tracing::warn!(error = %e, "payment left pending after failed funds check"),
        }

        self.order_callback(ctx, payment.order_id, OrderStatus::Failed).await?;
        tracing::info!(
            order_id = %payment.order_id,
            required = %payment.total_price,
            "insufficient funds, order failed"
        );
        Err(SettlementError::InsufficientFunds {
            payment_id: payment.id,
            required: payment.total_price,
            tendered,
        })
    }

    /// Moves a pending payment to `status`. Returns `None` when a concurrent
    /// transaction settled the payment first.
    async fn mark_payment(
        &self,
        ctx: &RequestContext,
        payment_id: PaymentId,
        status: PaymentStatus,
    ) -> Result<Option<Payment>> {
        match ctx.bound(self.payments.update_status(payment_id, status)).await? {
            Ok(Transition::Applied(payment)) => Ok(Some(payment)),
            Ok(Transition::Unchanged(_)) | Err(LedgerError::InvalidTransition { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn order_callback(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<()> {
        let mut callback_ctx = RequestContext::with_timeout(self.callback_timeout);
        if let Some(caller) = ctx.caller() {
            callback_ctx = callback_ctx.for_caller(caller);
        }

        match self.orders.update_status(&callback_ctx, order_id, status).await {
            Ok(_) => Ok(()),
            Err(source) => {
                metrics::counter!("consistency_hazards_total", "kind" => "status_callback")
                    .increment(1);
                tracing::error!(
                    target: "consistency",
                    %order_id,
                    %status,
                    error = %source,
                    "order status callback failed after payment write"
                );
                Err(SettlementError::StatusCallbackFailed {
                    order_id,
                    status,
                    source,
                })
            }
        }
    }

    async fn load_order(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order> {
        match self.orders.get_order(ctx, order_id).await {
            Ok(order) => Ok(order),
            Err(CallbackError::OrderNotFound(id)) => Err(SettlementError::OrderNotFound(id)),
            Err(e) => Err(SettlementError::OrderService(e)),
        }
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn get_payment(
        &self,
        ctx: &RequestContext,
        payment_id: PaymentId,
    ) -> Result<Payment> {
        ctx.bound(self.payments.get_payment(payment_id))
            .await??
            .ok_or(SettlementError::PaymentNotFound(payment_id))
    }

    pub async fn get_payment_for_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
    ) -> Result<Option<Payment>> {
        Ok(ctx.bound(self.payments.get_payment_for_order(order_id)).await??)
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn list_payments(&self, ctx: &RequestContext, page: u32) -> Result<Vec<Payment>> {
        Ok(ctx.bound(self.payments.list_payments(page)).await??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn payment(status: PaymentStatus) -> Payment {
        Payment {
            id: PaymentId::new(1),
            order_id: OrderId::new(2),
            user_id: UserId::new(3),
            total_price: Money::from_cents(3000),
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(TransactionOutcome::AlreadySettled(payment(
            PaymentStatus::Paid,
        )))
        .unwrap();
        assert_eq!(json["outcome"], "already_settled");
        assert_eq!(json["payment"]["status"], "paid");
        assert_eq!(json["payment"]["total_price"], 3000);
    }

    #[test]
    fn outcome_exposes_payment() {
        let outcome = TransactionOutcome::Paid(payment(PaymentStatus::Paid));
        assert_eq!(outcome.payment().id, PaymentId::new(1));
        assert_eq!(outcome.as_str(), "paid");
    }
}
