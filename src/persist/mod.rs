pub mod types;
pub use types::*;
pub mod memory;
pub mod postgres;
use async_trait::async_trait;

use crate::engine::types::{Order, OrderId, OrderStatus};

/// The system of record for orders. The book only reads it at bootstrap; the
/// coordinator writes fills back after each event.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Orders of `symbol` still on the book, in original placement order.
    async fn active_orders_of_symbol(&self, symbol: &str) -> PersistResult<Vec<Order>>;

    /// Sets filled quantity and status, only while the stored status is still on-book.
    /// Returns whether a row changed.
    async fn update_fill(&self, order_id: OrderId, filled_quantity: f64, status: OrderStatus) -> PersistResult<bool>;

    async fn insert(&self, order: &Order, status: OrderStatus) -> PersistResult<()>;
}
