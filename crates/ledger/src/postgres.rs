//! PostgreSQL-backed ledgers.
//!
//! Multi-statement work runs inside a `sqlx::Transaction`, which is committed
//! explicitly on success and rolled back when dropped on any other exit path
//! (early `?` return, panic unwinding, or a cancelled future).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, ProductId, UserId};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::model::{order_transition, page_offset, payment_transition};
use crate::{
    CatalogStore, LedgerError, NewOrder, NewPayment, NewProduct, Order, OrderLedger, OrderLine,
    OrderStatus, PAGE_SIZE, Payment, PaymentLedger, PaymentStatus, Product, ProductUpdate, Result,
    Transition,
};

/// Runs the database migrations for ledgers and the channel log.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

fn count_from_db(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| LedgerError::Validation(format!("{column} out of range: {value}")))
}

const PRODUCT_COLUMNS: &str =
    "id, name, description, unit_price_cents, stock, created_at, updated_at";

/// PostgreSQL-backed catalog store.
#[derive(Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            stock: count_from_db(row.try_get("stock")?, "stock")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn current_stock(&self, id: ProductId) -> Result<Option<i64>> {
        let stock = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        Ok(stock)
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalog {
    #[tracing::instrument(skip(self))]
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn list_products(&self, page: u32) -> Result<Vec<Product>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(PAGE_SIZE))
        .bind(i64::from(page_offset(page)))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    #[tracing::instrument(skip(self, product), fields(name = %product.name))]
    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        product.validate()?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO products (name, description, unit_price_cents, stock)
            VALUES ($1, $2, $3, $4)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.unit_price.cents())
        .bind(i64::from(product.stock))
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_product(row)
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        update.validate()?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                unit_price_cents = COALESCE($4, unit_price_cents),
                stock = COALESCE($5, stock),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id.as_i64())
        .bind(update.name())
        .bind(update.description())
        .bind(update.unit_price.map(|p| p.cents()))
        .bind(update.stock.map(i64::from))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product)
            .transpose()?
            .ok_or_else(|| LedgerError::product_not_found(id))
    }

    #[tracing::instrument(skip(self))]
    async fn delete_product(&self, id: ProductId) -> Result<()> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::product_not_found(id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<u32> {
        // Single conditional write: the row lock taken by UPDATE serializes
        // concurrent checkouts, and the WHERE clause re-checks stock under it.
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = stock - $2, updated_at = NOW()
            WHERE id = $1 AND stock >= $2
            RETURNING stock
            "#,
        )
        .bind(id.as_i64())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        match remaining {
            Some(stock) => count_from_db(stock, "stock"),
            None => match self.current_stock(id).await? {
                None => Err(LedgerError::product_not_found(id)),
                Some(available) => Err(LedgerError::InsufficientStock {
                    product_id: id,
                    requested: quantity,
                    available: count_from_db(available, "stock")?,
                }),
            },
        }
    }

    #[tracing::instrument(skip(self))]
    async fn restore_stock(&self, id: ProductId, quantity: u32) -> Result<u32> {
        let stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = stock + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING stock
            "#,
        )
        .bind(id.as_i64())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        let stock = stock.ok_or_else(|| LedgerError::product_not_found(id))?;
        count_from_db(stock, "stock")
    }
}

const ORDER_COLUMNS: &str = "id, user_id, total_price_cents, status, created_at, updated_at";

/// PostgreSQL-backed order ledger.
#[derive(Clone)]
pub struct PostgresOrderLedger {
    pool: PgPool,
}

impl PostgresOrderLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order> {
        let status: String = row.try_get("status")?;
        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            total_price: Money::from_cents(row.try_get("total_price_cents")?),
            status: status.parse()?,
            lines,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_line(row: PgRow) -> Result<OrderLine> {
        Ok(OrderLine {
            order_id: OrderId::new(row.try_get("order_id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: count_from_db(row.try_get("quantity")?, "quantity")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        })
    }

    async fn load_lines(conn: &mut PgConnection, order_id: OrderId) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, unit_price_cents
            FROM order_lines
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(Self::row_to_line).collect()
    }

    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let id = OrderId::new(row.try_get("id")?);
            let lines = Self::load_lines(&mut conn, id).await?;
            orders.push(Self::row_to_order(&row, lines)?);
        }
        Ok(orders)
    }
}

#[async_trait]
impl OrderLedger for PostgresOrderLedger {
    #[tracing::instrument(skip(self, order), fields(user_id = %order.user_id, lines = order.lines.len()))]
    async fn create_order(&self, order: NewOrder) -> Result<Order> {
        order.validate()?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (user_id, total_price_cents, status)
            VALUES ($1, $2, 'pending')
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.user_id.as_i64())
        .bind(order.total_price.cents())
        .fetch_one(&mut *tx)
        .await?;
        let order_id = OrderId::new(row.try_get("id")?);

        let mut lines = Vec::with_capacity(order.lines.len());
        for line in order.lines {
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, product_id, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(order_id.as_i64())
            .bind(line.product_id.as_i64())
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.cents())
            .execute(&mut *tx)
            .await?;

            lines.push(OrderLine {
                order_id,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            });
        }

        let order = Self::row_to_order(&row, lines)?;
        tx.commit().await?;
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_orders(&self, user_id: Option<UserId>, page: u32) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE ($1::BIGINT IS NULL OR user_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id.map(|u| u.as_i64()))
        .bind(i64::from(PAGE_SIZE))
        .bind(i64::from(page_offset(page)))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(older_than)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Transition<Order>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::order_not_found(id))?;

        let current: String = row.try_get("status")?;
        let current: OrderStatus = current.parse()?;
        if !order_transition(id, current, status)? {
            let lines = Self::load_lines(&mut tx, id).await?;
            let order = Self::row_to_order(&row, lines)?;
            tx.commit().await?;
            return Ok(Transition::Unchanged(order));
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE orders SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id.as_i64())
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let lines = Self::load_lines(&mut tx, id).await?;
        let order = Self::row_to_order(&row, lines)?;

        tx.commit().await?;
        Ok(Transition::Applied(order))
    }
}

const PAYMENT_COLUMNS: &str =
    "id, order_id, user_id, total_price_cents, status, created_at, updated_at";

/// PostgreSQL-backed payment ledger.
#[derive(Clone)]
pub struct PostgresPaymentLedger {
    pool: PgPool,
}

impl PostgresPaymentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        Ok(Payment {
            id: PaymentId::new(row.try_get("id")?),
            order_id: OrderId::new(row.try_get("order_id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            total_price: Money::from_cents(row.try_get("total_price_cents")?),
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl PaymentLedger for PostgresPaymentLedger {
    #[tracing::instrument(skip(self, payment), fields(order_id = %payment.order_id))]
    async fn create_payment(&self, payment: NewPayment) -> Result<Payment> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payments (order_id, user_id, total_price_cents, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (order_id) DO NOTHING
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.order_id.as_i64())
        .bind(payment.user_id.as_i64())
        .bind(payment.total_price.cents())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_payment(row);
        }

        let existing: i64 = sqlx::query_scalar("SELECT id FROM payments WHERE order_id = $1")
            .bind(payment.order_id.as_i64())
            .fetch_one(&self.pool)
            .await?;
        Err(LedgerError::DuplicatePayment {
            order_id: payment.order_id,
            payment_id: PaymentId::new(existing),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn list_payments(&self, page: u32) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(PAGE_SIZE))
        .bind(i64::from(page_offset(page)))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
    ) -> Result<Transition<Payment>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::payment_not_found(id))?;

        let current = Self::row_to_payment(row)?;
        if !payment_transition(id, current.status, status)? {
            tx.commit().await?;
            return Ok(Transition::Unchanged(current));
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE payments SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(id.as_i64())
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let payment = Self::row_to_payment(row)?;

        tx.commit().await?;
        Ok(Transition::Applied(payment))
    }
}
