//! Re-announces orders whose settlement never started.
//!
//! An order whose event was lost (publish failed after commit, or the event
//! was dead-lettered) stays pending with no payment. The reconciler finds such
//! orders once they are older than a threshold and publishes their event again.
//! Settlement rejects a second payment for the same order, so an order that
//! is announced twice is still settled once.

use std::time::Duration;

use channel::{Broker, EventProducer};
use chrono::Utc;
use common::{DEFAULT_CALL_TIMEOUT, RequestContext};
use ledger::{OrderLedger, PaymentLedger};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::coordinator::{DEFAULT_ORDER_TOPIC, order_created_event};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub topic: String,
    pub interval: Duration,
    /// Pending orders younger than this are left alone.
    pub stale_after: Duration,
    pub batch_size: u32,
    /// Bound on each ledger read.
    pub call_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_ORDER_TOPIC.to_string(),
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
            batch_size: 100,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub republished: usize,
    /// Orders that already have a payment.
    pub in_settlement: usize,
    pub failed: usize,
}

pub struct Reconciler<O, P, B> {
    orders: O,
    payments: P,
    producer: EventProducer<B>,
    config: ReconcilerConfig,
}

impl<O, P, B> Reconciler<O, P, B>
where
    O: OrderLedger,
    P: PaymentLedger,
    B: Broker,
{
    pub fn new(
        orders: O,
        payments: P,
        producer: EventProducer<B>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            orders,
            payments,
            producer,
            config,
        }
    }

    /// Runs one pass over stale pending orders.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - stale_after;

        let stale = self
            .call()
            .bound(self.orders.list_stale_pending(cutoff, self.config.batch_size))
            .await??;

        let mut report = ReconcileReport {
            examined: stale.len(),
            ..Default::default()
        };

        for order in stale {
            let payment = self
                .call()
                .bound(self.payments.get_payment_for_order(order.id))
                .await??;
            if payment.is_some() {
                report.in_settlement += 1;
                continue;
            }

            match self
                .producer
                .publish_event(&self.config.topic, &order_created_event(&order))
                .await
            {
                Ok(_) => {
                    report.republished += 1;
                    metrics::counter!("reconciler_republished_total").increment(1);
                    tracing::info!(order_id = %order.id, "stale pending order re-announced");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(order_id = %order.id, error = %e, "re-announcing order failed");
                }
            }
        }

        Ok(report)
    }

    fn call(&self) -> RequestContext {
        RequestContext::with_timeout(self.config.call_timeout)
    }

    /// Reconciles every `interval` until `shutdown` is cancelled.
    /// A zero interval disables the loop.
    pub async fn run(&self, shutdown: CancellationToken) {
        if self.config.interval.is_zero() {
            tracing::info!("reconciler disabled");
            return;
        }
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            "reconciler started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.reconcile_once().await {
                        Ok(report) if report.examined > 0 => {
                            tracing::info!(?report, "reconcile pass finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "reconcile pass failed"),
                    }
                }
            }
        }

        tracing::info!("reconciler stopped");
    }
}
