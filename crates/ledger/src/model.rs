//! Records held by the ledgers.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Number of records returned per listing page.
pub const PAGE_SIZE: u32 = 15;

/// Row offset of a 1-based page number. Page 0 is treated as page 1.
pub fn page_offset(page: u32) -> u32 {
    page.max(1).saturating_sub(1).saturating_mul(PAGE_SIZE)
}

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub unit_price: Money,
    pub stock: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub unit_price: Money,
    pub stock: u32,
}

impl NewProduct {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::Validation("product name is required".into()));
        }
        if self.unit_price.is_negative() {
            return Err(LedgerError::Validation(format!(
                "unit price must not be negative, got {}",
                self.unit_price
            )));
        }
        Ok(())
    }
}

/// Administrative field-level update of a product.
///
/// `None` keeps the stored value, as does an empty name or description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit_price: Option<Money>,
    pub stock: Option<u32>,
}

impl ProductUpdate {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(price) = self.unit_price
            && price.is_negative()
        {
            return Err(LedgerError::Validation(format!(
                "unit price must not be negative, got {price}"
            )));
        }
        Ok(())
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.trim().is_empty())
    }

    pub(crate) fn description(&self) -> Option<&str> {
        self.description.as_deref().filter(|d| !d.trim().is_empty())
    }
}

/// Lifecycle of an order.
///
/// ```text
/// Pending ──┬──► Paid
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(LedgerError::Validation(format!(
                "unknown order status '{other}'"
            ))),
        }
    }
}

/// A line of an order, priced at the time the order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

/// An order together with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for persisting a new pending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub total_price: Money,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl NewOrder {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(LedgerError::Validation("order has no lines".into()));
        }
        if let Some(line) = self.lines.iter().find(|l| l.quantity == 0) {
            return Err(LedgerError::Validation(format!(
                "quantity for product {} must be greater than 0",
                line.product_id
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a payment.
///
/// ```text
/// Pending ──┬──► Paid
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(LedgerError::Validation(format!(
                "unknown payment status '{other}'"
            ))),
        }
    }
}

/// A payment for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
}

/// Outcome of a status update.
///
/// Repeating a terminal status is not an error: the record comes back as
/// `Unchanged` so callers can tell a first transition from a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T> {
    Applied(T),
    Unchanged(T),
}

impl<T> Transition<T> {
    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Transition::Applied(value) | Transition::Unchanged(value) => value,
        }
    }
}

/// A status with a `pending` start and terminal ends.
pub(crate) trait Status: Copy + PartialEq {
    const ENTITY: &'static str;

    fn name(&self) -> &'static str;

    fn is_final(&self) -> bool;
}

impl Status for OrderStatus {
    const ENTITY: &'static str = "order";

    fn name(&self) -> &'static str {
        self.as_str()
    }

    fn is_final(&self) -> bool {
        self.is_terminal()
    }
}

impl Status for PaymentStatus {
    const ENTITY: &'static str = "payment";

    fn name(&self) -> &'static str {
        self.as_str()
    }

    fn is_final(&self) -> bool {
        self.is_terminal()
    }
}

/// Checks a status move shared by orders and payments: `pending` moves to a
/// terminal status once, a repeated terminal status is a no-op.
pub(crate) fn check_transition<S: Status>(id: i64, from: S, to: S) -> Result<bool> {
    if from == to && from.is_final() {
        return Ok(false);
    }
    if from.is_final() || !to.is_final() {
        return Err(LedgerError::InvalidTransition {
            entity: S::ENTITY,
            id,
            from: from.name(),
            to: to.name(),
        });
    }
    Ok(true)
}

pub(crate) fn order_transition(id: OrderId, from: OrderStatus, to: OrderStatus) -> Result<bool> {
    check_transition(id.as_i64(), from, to)
}

pub(crate) fn payment_transition(
    id: PaymentId,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<bool> {
    check_transition(id.as_i64(), from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(0), 0);
        assert_eq!(page_offset(1), 0);
        assert_eq!(page_offset(2), PAGE_SIZE);
        assert_eq!(page_offset(u32::MAX), u32::MAX);
    }

    #[test]
    fn test_order_status_round_trips_through_str() {
        for status in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Failed] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert_eq!("Pending".parse::<OrderStatus>().unwrap(), OrderStatus::Pending);
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_order_transitions() {
        let id = OrderId::new(1);
        assert!(order_transition(id, OrderStatus::Pending, OrderStatus::Paid).unwrap());
        assert!(order_transition(id, OrderStatus::Pending, OrderStatus::Failed).unwrap());
        assert!(!order_transition(id, OrderStatus::Paid, OrderStatus::Paid).unwrap());
        assert!(!order_transition(id, OrderStatus::Failed, OrderStatus::Failed).unwrap());
        assert!(order_transition(id, OrderStatus::Paid, OrderStatus::Failed).is_err());
        assert!(order_transition(id, OrderStatus::Failed, OrderStatus::Paid).is_err());
        assert!(order_transition(id, OrderStatus::Pending, OrderStatus::Pending).is_err());
        assert!(order_transition(id, OrderStatus::Paid, OrderStatus::Pending).is_err());
    }

    #[test]
    fn test_payment_transitions() {
        let id = PaymentId::new(1);
        assert!(payment_transition(id, PaymentStatus::Pending, PaymentStatus::Paid).unwrap());
        assert!(!payment_transition(id, PaymentStatus::Paid, PaymentStatus::Paid).unwrap());
        assert!(payment_transition(id, PaymentStatus::Failed, PaymentStatus::Paid).is_err());
    }

    #[test]
    fn test_rejected_transition_names_both_statuses() {
        let err = payment_transition(PaymentId::new(7), PaymentStatus::Failed, PaymentStatus::Paid)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                entity: "payment",
                id: 7,
                from: "failed",
                to: "paid",
            }
        ));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Paid).unwrap(),
            "\"paid\""
        );
    }

    #[test]
    fn test_new_order_validation() {
        let empty = NewOrder {
            user_id: UserId::new(1),
            total_price: Money::zero(),
            lines: vec![],
        };
        assert!(matches!(empty.validate(), Err(LedgerError::Validation(_))));

        let zero_quantity = NewOrder {
            user_id: UserId::new(1),
            total_price: Money::zero(),
            lines: vec![NewOrderLine {
                product_id: ProductId::new(1),
                quantity: 0,
                unit_price: Money::from_cents(100),
            }],
        };
        assert!(zero_quantity.validate().is_err());
    }

    #[test]
    fn test_product_update_ignores_blank_text() {
        let update = ProductUpdate {
            name: Some("  ".into()),
            description: Some("new".into()),
            ..Default::default()
        };
        assert_eq!(update.name(), None);
        assert_eq!(update.description(), Some("new"));
    }
}
