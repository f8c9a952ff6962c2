use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::engine::types::{Order, OrderId, OrderStatus};
use crate::persist::{OrderStore, PersistError, PersistResult};

#[derive(Debug, Clone)]
struct Row {
    order: Order,
    status: OrderStatus,
}

/// Order store kept in process memory. Insertion order is placement order.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    rows: RwLock<Vec<Row>>,
    unavailable: AtomicBool,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with an I/O error, as an unreachable database would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, order_id: OrderId) -> Option<(Order, OrderStatus)> {
        self.rows
            .read()
            .iter()
            .find(|r| r.order.id == order_id)
            .map(|r| (r.order.clone(), r.status))
    }

    fn check(&self) -> PersistResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistError::Io("order store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn active_orders_of_symbol(&self, symbol: &str) -> PersistResult<Vec<Order>> {
        self.check()?;
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| r.order.symbol == symbol && r.status.is_on_book())
            .map(|r| r.order.clone())
            .collect())
    }

    async fn update_fill(&self, order_id: OrderId, filled_quantity: f64, status: OrderStatus) -> PersistResult<bool> {
        self.check()?;
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|r| r.order.id == order_id) {
            Some(row) if row.status.is_on_book() => {
                row.order.filled_quantity = filled_quantity;
                row.status = status;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PersistError::NotFound(order_id)),
        }
    }

    async fn insert(&self, order: &Order, status: OrderStatus) -> PersistResult<()> {
        self.check()?;
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|r| r.order.id == order.id) {
            Some(row) => {
                row.order = order.clone();
                row.status = status;
            }
            None => rows.push(Row { order: order.clone(), status }),
        }
        Ok(())
    }
}
