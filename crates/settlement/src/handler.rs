//! Settles orders announced on the event channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use channel::{HandlerError, Message, MessageHandler, OrderCreatedEvent};
use common::{DEFAULT_CALL_TIMEOUT, RequestContext};
use ledger::PaymentLedger;

use crate::SettlementError;
use crate::orders::OrderStatusClient;
use crate::worker::{SettleRequest, SettlementWorker};

/// Turns each order-created event into a pending payment.
///
/// Redelivered events are acknowledged: a second settle for the same order
/// stops at the duplicate-payment guard. Events that can never be settled
/// are reported as malformed so the consumer dead-letters them; transient
/// failures leave the offset uncommitted for redelivery.
pub struct OrderCreatedHandler<P, S> {
    worker: Arc<SettlementWorker<P, S>>,
    call_timeout: Duration,
}

impl<P, S> OrderCreatedHandler<P, S> {
    pub fn new(worker: Arc<SettlementWorker<P, S>>) -> Self {
        Self {
            worker,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Deadline given to each settle call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[async_trait]
impl<P, S> MessageHandler for OrderCreatedHandler<P, S>
where
    P: PaymentLedger,
    S: OrderStatusClient,
{
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let event = OrderCreatedEvent::decode(&message.payload)
            .map_err(|e| HandlerError::Malformed(e.to_string()))?;

        if !event.is_pending() {
            tracing::info!(
                order_id = %event.order_id,
                status = %event.status,
                "skipping order event that is not pending"
            );
            return Ok(());
        }

        let ctx = RequestContext::with_timeout(self.call_timeout).for_caller(event.user_id);
        let request = SettleRequest {
            order_id: event.order_id,
            user_id: event.user_id,
            total_price: event.total_price,
        };

        match self.worker.settle(&ctx, request).await {
            Ok(payment) => {
                tracing::info!(
                    order_id = %event.order_id,
                    payment_id = %payment.id,
                    partition = message.partition,
                    offset = message.offset,
                    "order event settled"
                );
                Ok(())
            }
            Err(SettlementError::DuplicatePayment { payment_id, .. }) => {
                tracing::info!(
                    order_id = %event.order_id,
                    %payment_id,
                    "redelivered order event, payment already exists"
                );
                Ok(())
            }
            Err(SettlementError::OrderNotPending { status, .. }) => {
                tracing::info!(
                    order_id = %event.order_id,
                    %status,
                    "order already settled, event ignored"
                );
                Ok(())
            }
            Err(e) if e.kind().is_retryable() => {
                tracing::warn!(order_id = %event.order_id, error = %e, "settle failed, will retry");
                Err(HandlerError::Retryable(e.to_string()))
            }
            Err(e) => {
                tracing::error!(
                    order_id = %event.order_id,
                    error = %e,
                    "order event cannot be settled"
                );
                Err(HandlerError::Malformed(e.to_string()))
            }
        }
    }
}
