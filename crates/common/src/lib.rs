//! Shared types for the order fulfillment services.
//!
//! Identifiers are plain integer keys wrapped in newtypes so a product id can
//! never be passed where an order id is expected. Monetary amounts are carried
//! as integer cents.

pub mod context;
pub mod error;
pub mod ids;
pub mod money;

pub use context::{DEFAULT_CALL_TIMEOUT, DeadlineExceeded, RequestContext};
pub use error::ErrorKind;
pub use ids::{OrderId, PaymentId, ProductId, UserId};
pub use money::Money;
