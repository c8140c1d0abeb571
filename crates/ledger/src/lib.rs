//! Data-access contracts for the catalog, order and payment ledgers.
//!
//! Each ledger is a thin contract over relational storage: point lookups,
//! fixed-size pages, creation, and status or field updates. The only
//! operation with a concurrency burden is [`CatalogStore::decrement_stock`],
//! which every backend implements as a single conditional write.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use error::{LedgerError, Result};
pub use memory::{InMemoryCatalog, InMemoryOrderLedger, InMemoryPaymentLedger};
pub use model::{
    NewOrder, NewOrderLine, NewPayment, NewProduct, Order, OrderLine, OrderStatus, PAGE_SIZE,
    Payment, PaymentStatus, Product, ProductUpdate, Transition,
};
pub use postgres::{PostgresCatalog, PostgresOrderLedger, PostgresPaymentLedger, run_migrations};
pub use store::{CatalogStore, OrderLedger, PaymentLedger};
