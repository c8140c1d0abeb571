//! Integration tests for order placement, compensation and status callbacks.

use std::sync::Arc;
use std::time::Duration;

use channel::{EventProducer, InMemoryBroker, OrderCreatedEvent, ProducerConfig};
use common::{ErrorKind, Money, OrderId, ProductId, RequestContext, UserId};
use fulfillment::{
    DEFAULT_ORDER_TOPIC, FulfillmentError, LineItem, OrderCoordinator, OrderRequest,
    Reconciler, ReconcilerConfig,
};
use ledger::{
    CatalogStore, InMemoryCatalog, InMemoryOrderLedger, InMemoryPaymentLedger, LedgerError,
    NewPayment, NewProduct, OrderLedger, OrderStatus, PaymentLedger,
};

type TestCoordinator = OrderCoordinator<InMemoryCatalog, InMemoryOrderLedger, InMemoryBroker>;

struct TestHarness {
    coordinator: TestCoordinator,
    catalog: InMemoryCatalog,
    orders: InMemoryOrderLedger,
    broker: InMemoryBroker,
}

impl TestHarness {
    fn new() -> Self {
        let catalog = InMemoryCatalog::new();
        let orders = InMemoryOrderLedger::new();
        let broker = InMemoryBroker::default();
        let producer = EventProducer::with_config(
            broker.clone(),
            ProducerConfig {
                max_retries: 2,
                retry_backoff: Duration::from_millis(1),
                ..Default::default()
            },
        );
        let coordinator = OrderCoordinator::new(catalog.clone(), orders.clone(), producer);

        Self {
            coordinator,
            catalog,
            orders,
            broker,
        }
    }

    async fn product(&self, price_cents: i64, stock: u32) -> ProductId {
        self.catalog
            .create_product(NewProduct {
                name: "Widget".to_string(),
                description: "A widget".to_string(),
                unit_price: Money::from_cents(price_cents),
                stock,
            })
            .await
            .unwrap()
            .id
    }

    fn stock(&self, id: ProductId) -> u32 {
        self.catalog.stock_of(id).unwrap()
    }
}

fn line(product_id: ProductId, quantity: u32, price_cents: i64) -> LineItem {
    LineItem {
        product_id,
        quantity,
        price: Money::from_cents(price_cents),
    }
}

fn order_for(items: Vec<LineItem>) -> OrderRequest {
    OrderRequest {
        user_id: UserId::new(1),
        items,
    }
}

#[tokio::test]
async fn test_order_reserves_stock_and_stays_pending() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;

    let placed = h
        .coordinator
        .create_order(&RequestContext::new(), order_for(vec![line(p1, 3, 3000)]))
        .await
        .unwrap();

    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.total_price, Money::from_cents(3000));
    assert_eq!(placed.order.lines.len(), 1);
    assert_eq!(placed.order.lines[0].unit_price, Money::from_cents(1000));
    assert!(placed.warning.is_none());
    assert_eq!(h.stock(p1), 2);
    assert_eq!(h.broker.message_count(DEFAULT_ORDER_TOPIC), 1);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_stock_unchanged() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    let ctx = RequestContext::new();

    h.coordinator
        .create_order(&ctx, order_for(vec![line(p1, 3, 3000)]))
        .await
        .unwrap();

    let err = h
        .coordinator
        .create_order(&ctx, order_for(vec![line(p1, 3, 3000)]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FulfillmentError::InsufficientStock {
            requested: 3,
            available: 2,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(h.stock(p1), 2);
    assert_eq!(h.orders.order_count(), 1);
}

#[tokio::test]
async fn test_underpriced_line_rejects_whole_order() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    let p2 = h.product(500, 5).await;

    let err = h
        .coordinator
        .create_order(
            &RequestContext::new(),
            order_for(vec![line(p1, 1, 1000), line(p2, 2, 999)]),
        )
        .await
        .unwrap_err();

    match err {
        FulfillmentError::PriceMismatch {
            product_id,
            expected,
            offered,
        } => {
            assert_eq!(product_id, p2);
            assert_eq!(expected, Money::from_cents(1000));
            assert_eq!(offered, Money::from_cents(999));
        }
        other => panic!("expected PriceMismatch, got {other:?}"),
    }
    assert_eq!(h.stock(p1), 5);
    assert_eq!(h.stock(p2), 5);
    assert_eq!(h.orders.order_count(), 0);
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let h = TestHarness::new();
    let err = h
        .coordinator
        .create_order(
            &RequestContext::new(),
            order_for(vec![line(ProductId::new(42), 1, 100)]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::ProductNotFound(id) if id == ProductId::new(42)));
}

#[tokio::test]
async fn test_failed_decrement_restores_earlier_lines() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    let p2 = h.product(1000, 5).await;
    let p3 = h.product(1000, 5).await;
    h.catalog.fail_decrement_for(p2);

    let err = h
        .coordinator
        .create_order(
            &RequestContext::new(),
            order_for(vec![line(p1, 2, 2000), line(p2, 1, 1000), line(p3, 1, 1000)]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(h.stock(p1), 5);
    assert_eq!(h.stock(p2), 5);
    assert_eq!(h.stock(p3), 5);
    assert_eq!(h.orders.order_count(), 0);
    assert_eq!(h.broker.message_count(DEFAULT_ORDER_TOPIC), 0);
}

#[tokio::test]
async fn test_failed_order_insert_restores_all_lines() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    let p2 = h.product(500, 5).await;
    h.orders.set_fail_on_create(true);

    let err = h
        .coordinator
        .create_order(
            &RequestContext::new(),
            order_for(vec![line(p1, 2, 2000), line(p2, 4, 2000)]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::Ledger(_)));
    assert_eq!(h.stock(p1), 5);
    assert_eq!(h.stock(p2), 5);
}

#[tokio::test]
async fn test_failed_restore_is_a_consistency_hazard() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    let p2 = h.product(1000, 5).await;
    h.catalog.fail_decrement_for(p2);
    h.catalog.set_fail_on_restore(true);

    let err = h
        .coordinator
        .create_order(
            &RequestContext::new(),
            order_for(vec![line(p1, 2, 2000), line(p2, 1, 1000)]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConsistencyHazard);
    match err {
        FulfillmentError::CompensationFailed { products, .. } => assert_eq!(products, vec![p1]),
        other => panic!("expected CompensationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_publish_failure_keeps_order_and_warns() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    h.broker.fail_next_publishes(10);

    let placed = h
        .coordinator
        .create_order(&RequestContext::new(), order_for(vec![line(p1, 3, 3000)]))
        .await
        .unwrap();

    assert!(placed.is_settlement_deferred());
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(h.stock(p1), 2);
    assert_eq!(h.orders.order_count(), 1);
    assert_eq!(h.broker.message_count(DEFAULT_ORDER_TOPIC), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_catalog_hits_deadline() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    h.catalog.set_delay(Some(Duration::from_secs(30)));

    let ctx = RequestContext::with_timeout(Duration::from_secs(1));
    let err = h
        .coordinator
        .create_order(&ctx, order_for(vec![line(p1, 1, 1000)]))
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::DeadlineExceeded(_)));
    assert_eq!(err.kind(), ErrorKind::Transient);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_never_oversell() {
    let h = Arc::new(TestHarness::new());
    let p1 = h.product(1000, 5).await;

    let attempts = (0..20).map(|_| {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            h.coordinator
                .create_order(&RequestContext::new(), order_for(vec![line(p1, 1, 1000)]))
                .await
        })
    });
    let results = futures_util::future::join_all(attempts).await;

    let mut accepted = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => accepted += 1,
            Err(FulfillmentError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected rejection: {other:?}"),
        }
    }

    assert_eq!(accepted, 5);
    assert_eq!(h.stock(p1), 0);
    assert_eq!(h.orders.order_count(), 5);
}

#[tokio::test]
async fn test_get_order_returns_lines() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    let ctx = RequestContext::new();
    let placed = h
        .coordinator
        .create_order(&ctx, order_for(vec![line(p1, 2, 2000)]))
        .await
        .unwrap();

    let order = h.coordinator.get_order(&ctx, placed.order.id).await.unwrap();
    assert_eq!(order, placed.order);

    let missing = h.coordinator.get_order(&ctx, OrderId::new(999)).await;
    assert!(matches!(missing, Err(FulfillmentError::OrderNotFound(_))));

    let listed = h
        .coordinator
        .list_orders(&ctx, Some(UserId::new(1)), 1)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_failed_status_restores_stock_once() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    let ctx = RequestContext::new();
    let placed = h
        .coordinator
        .create_order(&ctx, order_for(vec![line(p1, 3, 3000)]))
        .await
        .unwrap();
    assert_eq!(h.stock(p1), 2);

    let first = h
        .coordinator
        .update_order_status(&ctx, placed.order.id, OrderStatus::Failed)
        .await
        .unwrap();
    assert!(first.was_applied());
    assert_eq!(h.stock(p1), 5);

    let replay = h
        .coordinator
        .update_order_status(&ctx, placed.order.id, OrderStatus::Failed)
        .await
        .unwrap();
    assert!(!replay.was_applied());
    assert_eq!(h.stock(p1), 5);
}

#[tokio::test]
async fn test_paid_order_is_terminal() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 5).await;
    let ctx = RequestContext::new();
    let placed = h
        .coordinator
        .create_order(&ctx, order_for(vec![line(p1, 3, 3000)]))
        .await
        .unwrap();

    h.coordinator
        .update_order_status(&ctx, placed.order.id, OrderStatus::Paid)
        .await
        .unwrap();
    assert_eq!(h.stock(p1), 2);

    let err = h
        .coordinator
        .update_order_status(&ctx, placed.order.id, OrderStatus::Failed)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::Ledger(LedgerError::InvalidTransition { .. })
    ));

    let order = h.coordinator.get_order(&ctx, placed.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(h.stock(p1), 2);
}

#[tokio::test]
async fn test_status_update_for_unknown_order() {
    let h = TestHarness::new();
    let err = h
        .coordinator
        .update_order_status(&RequestContext::new(), OrderId::new(7), OrderStatus::Paid)
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::OrderNotFound(_)));
}

#[tokio::test]
async fn test_reconciler_reannounces_stale_orders_without_payment() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 10).await;
    let ctx = RequestContext::new();
    h.broker.fail_next_publishes(10);

    let lost = h
        .coordinator
        .create_order(&ctx, order_for(vec![line(p1, 1, 1000)]))
        .await
        .unwrap();
    let settling = h
        .coordinator
        .create_order(&ctx, order_for(vec![line(p1, 1, 1000)]))
        .await
        .unwrap();
    assert!(lost.is_settlement_deferred());
    h.broker.fail_next_publishes(0);

    let an_hour_ago = chrono::Utc::now() - chrono::Duration::hours(1);
    h.orders.set_created_at(lost.order.id, an_hour_ago);
    h.orders.set_created_at(settling.order.id, an_hour_ago);

    let payments = InMemoryPaymentLedger::new();
    payments
        .create_payment(NewPayment {
            order_id: settling.order.id,
            user_id: UserId::new(1),
            total_price: Money::from_cents(1000),
        })
        .await
        .unwrap();

    let reconciler = Reconciler::new(
        h.orders.clone(),
        payments,
        EventProducer::new(h.broker.clone()),
        ReconcilerConfig::default(),
    );
    let report = reconciler.reconcile_once().await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.republished, 1);
    assert_eq!(report.in_settlement, 1);

    let messages = h.broker.messages(DEFAULT_ORDER_TOPIC);
    assert_eq!(messages.len(), 1);
    let event = OrderCreatedEvent::decode(&messages[0].payload).unwrap();
    assert_eq!(event.order_id, lost.order.id);
}

#[tokio::test]
async fn test_reconciler_ignores_fresh_orders() {
    let h = TestHarness::new();
    let p1 = h.product(1000, 10).await;
    h.coordinator
        .create_order(&RequestContext::new(), order_for(vec![line(p1, 1, 1000)]))
        .await
        .unwrap();

    let reconciler = Reconciler::new(
        h.orders.clone(),
        InMemoryPaymentLedger::new(),
        EventProducer::new(h.broker.clone()),
        ReconcilerConfig::default(),
    );
    let report = reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.examined, 0);

    let pending = h
        .orders
        .list_stale_pending(chrono::Utc::now() + chrono::Duration::seconds(1), 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconciler_gives_up_on_stalled_ledger() {
    let h = TestHarness::new();
    h.orders.set_delay(Some(Duration::from_secs(60)));

    let reconciler = Reconciler::new(
        h.orders.clone(),
        InMemoryPaymentLedger::new(),
        EventProducer::new(h.broker.clone()),
        ReconcilerConfig {
            call_timeout: Duration::from_secs(1),
            ..Default::default()
        },
    );
    let err = reconciler.reconcile_once().await.unwrap_err();

    assert!(matches!(err, FulfillmentError::DeadlineExceeded(_)));
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(h.broker.message_count(DEFAULT_ORDER_TOPIC), 0);
}
