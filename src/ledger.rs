use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::engine::types::{AccountId, OrderBookEvent, Side};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Balance accounting fed with every successful book event.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn record(&self, symbol: &str, event: &OrderBookEvent) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Balance {
    pub base: f64,
    pub quote: f64,
}

/// Keeps every recorded event and nets base/quote movements per account.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    events: Mutex<Vec<(String, OrderBookEvent)>>,
    balances: Mutex<AHashMap<AccountId, Balance>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, OrderBookEvent)> {
        self.events.lock().clone()
    }

    pub fn balance(&self, account: AccountId) -> Balance {
        self.balances.lock().get(&account).copied().unwrap_or_default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record(&self, symbol: &str, event: &OrderBookEvent) -> Result<(), SinkError> {
        {
            let mut balances = self.balances.lock();
            for m in &event.matches {
                let (buyer, seller) = match m.taker_side {
                    Side::BUY => (m.taker_account_id, m.maker_account_id),
                    Side::SELL => (m.maker_account_id, m.taker_account_id),
                };
                let notional = m.price * m.quantity;
                let b = balances.entry(buyer).or_default();
                b.base += m.quantity;
                b.quote -= notional;
                let s = balances.entry(seller).or_default();
                s.base -= m.quantity;
                s.quote += notional;
            }
        }
        trace!(symbol = symbol, matches = event.matches.len(), "Ledger recorded event");
        self.events.lock().push((symbol.to_string(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{MatchOutcome, Order, Reason, ReasonKind};

    #[tokio::test]
    async fn test_balances_net_to_zero() {
        let ledger = MemoryLedger::new();
        let taker = Order::limit(2, 20, "BTC-USD", Side::BUY, 100.0, 3.0);
        let outcome = MatchOutcome {
            taker_order_id: 2,
            taker_account_id: 20,
            maker_order_id: 1,
            maker_account_id: 10,
            taker_side: Side::BUY,
            price: 100.0,
            quantity: 3.0,
            maker_filled_quantity: 3.0,
            maker_filled_completely: true,
        };
        let event = OrderBookEvent::success(Reason::new(ReasonKind::Placed, &taker), vec![outcome], true);
        ledger.record("BTC-USD", &event).await.unwrap();

        assert_eq!(ledger.balance(20), Balance { base: 3.0, quote: -300.0 });
        assert_eq!(ledger.balance(10), Balance { base: -3.0, quote: 300.0 });
        assert_eq!(ledger.events().len(), 1);
    }
}
