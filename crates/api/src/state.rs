//! Shared application state and service wiring.

use std::sync::Arc;
use std::time::Duration;

use channel::{
    Broker, Consumer, ConsumerConfig, EventProducer, InMemoryBroker, PostgresBroker,
    ProducerConfig,
};
use fulfillment::{CoordinatorConfig, OrderCoordinator, Reconciler, ReconcilerConfig};
use ledger::{
    CatalogStore, InMemoryCatalog, InMemoryOrderLedger, InMemoryPaymentLedger, OrderLedger,
    PaymentLedger, PostgresCatalog, PostgresOrderLedger, PostgresPaymentLedger,
};
use settlement::{OrderCreatedHandler, SettlementWorker};
use sqlx::PgPool;

use crate::config::Config;

pub type SharedCatalog = Arc<dyn CatalogStore>;
pub type SharedOrders = Arc<dyn OrderLedger>;
pub type SharedPayments = Arc<dyn PaymentLedger>;
pub type SharedBroker = Arc<dyn Broker>;

pub type Coordinator = OrderCoordinator<SharedCatalog, SharedOrders, SharedBroker>;
pub type Worker = SettlementWorker<SharedPayments, Arc<Coordinator>>;
pub type SettlementConsumer =
    Consumer<SharedBroker, OrderCreatedHandler<SharedPayments, Arc<Coordinator>>>;
pub type PendingReconciler = Reconciler<SharedOrders, SharedPayments, SharedBroker>;

/// Storage and channel implementations the services run on.
#[derive(Clone)]
pub struct Backends {
    pub catalog: SharedCatalog,
    pub orders: SharedOrders,
    pub payments: SharedPayments,
    pub broker: SharedBroker,
    /// Reported by the health endpoint.
    pub storage: &'static str,
}

impl Backends {
    pub fn in_memory(partitions: u32) -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalog::new()),
            orders: Arc::new(InMemoryOrderLedger::new()),
            payments: Arc::new(InMemoryPaymentLedger::new()),
            broker: Arc::new(InMemoryBroker::new(partitions)),
            storage: "memory",
        }
    }

    pub fn postgres(pool: PgPool, partitions: u32) -> Self {
        Self {
            catalog: Arc::new(PostgresCatalog::new(pool.clone())),
            orders: Arc::new(PostgresOrderLedger::new(pool.clone())),
            payments: Arc::new(PostgresPaymentLedger::new(pool.clone())),
            broker: Arc::new(PostgresBroker::with_default_partitions(pool, partitions)),
            storage: "postgres",
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub worker: Arc<Worker>,
    /// Deadline given to every request.
    pub call_timeout: Duration,
    pub storage: &'static str,
}

/// The HTTP state plus the background tasks that run beside it.
pub struct Services {
    pub state: Arc<AppState>,
    pub consumer: SettlementConsumer,
    pub reconciler: PendingReconciler,
}

/// Builds the coordinator, the settlement worker and their background tasks.
pub fn build_services(backends: Backends, config: &Config) -> Services {
    let producer = EventProducer::with_config(
        backends.broker.clone(),
        ProducerConfig {
            max_retries: config.publish_max_retries,
            call_timeout: config.call_timeout,
            ..Default::default()
        },
    );

    let coordinator = Arc::new(OrderCoordinator::with_config(
        backends.catalog,
        backends.orders.clone(),
        producer.clone(),
        CoordinatorConfig {
            topic: config.order_topic.clone(),
            compensation_timeout: config.call_timeout,
        },
    ));

    let worker = Arc::new(
        SettlementWorker::new(backends.payments.clone(), coordinator.clone())
            .with_callback_timeout(config.call_timeout),
    );

    let consumer = Consumer::new(
        backends.broker,
        OrderCreatedHandler::new(worker.clone()).with_call_timeout(config.call_timeout),
        ConsumerConfig {
            call_timeout: config.call_timeout,
            ..ConsumerConfig::new(config.consumer_group.clone(), config.order_topic.clone())
        },
    );

    let reconciler = Reconciler::new(
        backends.orders,
        backends.payments,
        producer,
        ReconcilerConfig {
            topic: config.order_topic.clone(),
            interval: config.reconcile_interval,
            stale_after: config.reconcile_after,
            call_timeout: config.call_timeout,
            ..Default::default()
        },
    );

    let state = Arc::new(AppState {
        coordinator,
        worker,
        call_timeout: config.call_timeout,
        storage: backends.storage,
    });

    Services {
        state,
        consumer,
        reconciler,
    }
}
