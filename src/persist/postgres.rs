use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::debug;

use crate::engine::types::{Order, OrderId, OrderStatus, OrderType, Side};
use crate::persist::{OrderStore, PersistError, PersistResult};

/// Order store backed by an `orders` table:
///
/// ```sql
/// CREATE TABLE orders (
///     id              BIGINT PRIMARY KEY,
///     account_id      BIGINT NOT NULL,
///     symbol          TEXT NOT NULL,
///     side            TEXT NOT NULL,
///     order_type      TEXT NOT NULL,
///     price           DOUBLE PRECISION,
///     quantity        DOUBLE PRECISION NOT NULL,
///     filled_quantity DOUBLE PRECISION NOT NULL DEFAULT 0,
///     status          TEXT NOT NULL,
///     created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
/// );
/// ```
pub struct PostgresOrderStore {
    connection_pool: PgPool,
}

impl PostgresOrderStore {
    pub async fn new(database_url: &str) -> PersistResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { connection_pool: pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { connection_pool: pool }
    }
}

fn order_from_row(row: &PgRow) -> PersistResult<Order> {
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let id: i64 = row.try_get("id")?;
    let account_id: i64 = row.try_get("account_id")?;

    let side = match side.as_str() {
        "BUY" => Side::BUY,
        "SELL" => Side::SELL,
        other => return Err(PersistError::InvalidRow(format!("side {other}"))),
    };
    let order_type = match order_type.as_str() {
        "LIMIT" => OrderType::Limit,
        "MARKET" => OrderType::Market,
        "STOP" => OrderType::Stop,
        other => return Err(PersistError::InvalidRow(format!("order_type {other}"))),
    };

    Ok(Order {
        id: id as OrderId,
        account_id: account_id as u64,
        symbol: row.try_get("symbol")?,
        side,
        order_type,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        filled_quantity: row.try_get("filled_quantity")?,
    })
}

#[async_trait::async_trait]
impl OrderStore for PostgresOrderStore {
    async fn active_orders_of_symbol(&self, symbol: &str) -> PersistResult<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, symbol, side, order_type, price, quantity, filled_quantity
            FROM orders
            WHERE symbol = $1 AND status IN ('PLACED', 'PARTIALLY_FILLED')
            ORDER BY created_at ASC, id ASC
            "#
        )
        .bind(symbol)
        .fetch_all(&self.connection_pool)
        .await?;

        debug!(symbol = symbol, rows = rows.len(), "Loaded active orders");
        rows.iter().map(order_from_row).collect()
    }

    async fn update_fill(&self, order_id: OrderId, filled_quantity: f64, status: OrderStatus) -> PersistResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET filled_quantity = $1, status = $2
            WHERE id = $3 AND status IN ('PLACED', 'PARTIALLY_FILLED')
            "#
        )
        .bind(filled_quantity)
        .bind(status.as_str())
        .bind(order_id as i64)
        .execute(&self.connection_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert(&self, order: &Order, status: OrderStatus) -> PersistResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, account_id, symbol, side, order_type, price, quantity, filled_quantity, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET price = EXCLUDED.price, quantity = EXCLUDED.quantity,
                filled_quantity = EXCLUDED.filled_quantity, status = EXCLUDED.status
            "#
        )
        .bind(order.id as i64)
        .bind(order.account_id as i64)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.price)
        .bind(order.quantity)
        .bind(order.filled_quantity)
        .bind(status.as_str())
        .execute(&self.connection_pool)
        .await?;

        Ok(())
    }
}
