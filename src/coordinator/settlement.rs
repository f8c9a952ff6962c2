use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::types::{OrderBookEvent, OrderStatus, ReasonKind, EPSILON};
use crate::ledger::Ledger;
use crate::market_data::{MarketDataSink, Tick};
use crate::persist::OrderStore;

/// External services fed by the coordinator after each successful event.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn OrderStore>,
    pub ledger: Arc<dyn Ledger>,
    pub market_data: Arc<dyn MarketDataSink>,
}

impl Collaborators {
    pub fn new(store: Arc<dyn OrderStore>, ledger: Arc<dyn Ledger>, market_data: Arc<dyn MarketDataSink>) -> Self {
        Collaborators { store, ledger, market_data }
    }

    /// Forwards `event` to the ledger, market data and order store. Failures are
    /// logged; the book has already moved on and the caller still gets its event.
    pub async fn settle(&self, symbol: &str, event: &OrderBookEvent) {
        let reason = match &event.reason {
            Some(r) => r,
            None => return,
        };

        if let Err(e) = self.ledger.record(symbol, event).await {
            warn!(symbol = symbol, order_id = reason.order_id, error = %e, "Ledger rejected event");
        }

        for m in &event.matches {
            let tick = Tick { price: m.price, quantity: m.quantity, timestamp: event.timestamp };
            if let Err(e) = self.market_data.publish(symbol, tick).await {
                warn!(symbol = symbol, error = %e, "Market data publish failed");
            }
            let status = if m.maker_filled_completely { OrderStatus::Filled } else { OrderStatus::PartiallyFilled };
            self.write_back(m.maker_order_id, m.maker_filled_quantity, status).await;
        }

        let status = match reason.kind {
            ReasonKind::Canceled => OrderStatus::Canceled,
            _ if event.filled_completely => OrderStatus::Filled,
            // Market remainders are discarded, never rested.
            _ if reason.price.is_none() && reason.filled_quantity > EPSILON => OrderStatus::Canceled,
            _ if reason.price.is_none() => OrderStatus::Rejected,
            _ if reason.filled_quantity > EPSILON => OrderStatus::PartiallyFilled,
            _ => OrderStatus::Placed,
        };
        self.write_back(reason.order_id, reason.filled_quantity, status).await;
    }

    async fn write_back(&self, order_id: u64, filled_quantity: f64, status: OrderStatus) {
        match self.store.update_fill(order_id, filled_quantity, status).await {
            Ok(true) => debug!(order_id = order_id, status = status.as_str(), "Order store updated"),
            Ok(false) => debug!(order_id = order_id, "Order no longer on book in store, update skipped"),
            Err(e) => warn!(order_id = order_id, error = %e, "Order store update failed"),
        }
    }
}
