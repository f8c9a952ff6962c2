use tracing::{debug, error, instrument, trace};

use crate::engine::price_levels::{BestPrice, PriceLevelIndex};
use crate::engine::types::{
    BookError, LevelState, MatchOutcome, MatchReport, Order, OrderId, OrderType, PriceTick, Side, EPSILON,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideKind {
    Ask,
    Bid,
}

impl SideKind {
    /// The side resting orders of `side` are stored on.
    pub fn of(side: Side) -> SideKind {
        match side {
            Side::BUY => SideKind::Bid,
            Side::SELL => SideKind::Ask,
        }
    }
}

#[derive(Debug)]
pub struct BookSide {
    kind: SideKind,
    index: PriceLevelIndex,
}

impl BookSide {
    pub fn new(kind: SideKind) -> Self {
        let best = match kind {
            SideKind::Ask => BestPrice::Lowest,
            SideKind::Bid => BestPrice::Highest,
        };
        BookSide { kind, index: PriceLevelIndex::new(best) }
    }

    pub fn kind(&self) -> SideKind {
        self.kind
    }

    pub fn best_price(&self) -> Option<f64> {
        self.index.best_price()
    }

    // Whether an incoming order on the other side is willing to trade at `price`
    fn accepts(&self, incoming: &Order, price: f64) -> bool {
        if incoming.order_type == OrderType::Market {
            return true;
        }
        match (self.kind, incoming.price) {
            (SideKind::Ask, Some(limit)) => limit >= price,
            (SideKind::Bid, Some(limit)) => limit <= price,
            (_, None) => false,
        }
    }

    /// Matches `incoming` against this side from the best level down, filling it in place.
    #[instrument(level = "debug", skip(self, incoming), fields(order_id = incoming.id, side = ?self.kind))]
    pub fn try_to_match(&mut self, incoming: &mut Order) -> MatchReport {
        let mut report = MatchReport::default();

        while incoming.remaining() > EPSILON {
            let price = match self.index.best_price() {
                Some(p) => p,
                None => {
                    trace!(id = incoming.id, "Counter side is empty");
                    break;
                }
            };
            if !self.accepts(incoming, price) {
                trace!(id = incoming.id, best = price, limit = ?incoming.price, "Limit does not reach best price");
                break;
            }

            // Drain the level from its head until one of the two runs out.
            while incoming.remaining() > EPSILON {
                let maker = match self.index.first_order_at_mut(price) {
                    Some(m) => m,
                    None => break,
                };
                let qty = incoming.remaining().min(maker.remaining());
                maker.fill(qty);
                incoming.fill(qty);

                let outcome = MatchOutcome {
                    taker_order_id: incoming.id,
                    taker_account_id: incoming.account_id,
                    maker_order_id: maker.id,
                    maker_account_id: maker.account_id,
                    taker_side: incoming.side,
                    price,
                    quantity: qty,
                    maker_filled_quantity: maker.filled_quantity,
                    maker_filled_completely: maker.is_filled(),
                };
                debug!(taker_id = incoming.id, maker_id = maker.id, price = price, qty = qty, "Fill executed");

                let maker_id = maker.id;
                if outcome.maker_filled_completely {
                    if let Err(e) = self.index.remove_order(maker_id) {
                        error!(maker_id = maker_id, error = %e, "Filled maker missing from index");
                    }
                }
                match report.tick.as_mut() {
                    Some(tick) => tick.record(price, qty),
                    None => report.tick = Some(PriceTick::new(price, qty)),
                }
                report.matches.push(outcome);
            }
        }
        report
    }

    pub fn put_order_on_book(&mut self, order: Order) -> Result<(), BookError> {
        self.index.add_order(order).map(|_| ())
    }

    pub fn remove_order(&mut self, id: OrderId) -> Result<Order, BookError> {
        self.index.remove_order(id)
    }

    /// Rejects quantities below what has already traded.
    pub fn update_quantity(&mut self, id: OrderId, quantity: f64) -> Result<(), BookError> {
        let order = self.index.get(id).ok_or(BookError::OrderNotFound { id })?;
        if quantity < order.filled_quantity - EPSILON {
            return Err(BookError::InvalidQuantity { quantity, filled: order.filled_quantity });
        }
        self.index.update_quantity(id, quantity)
    }

    /// Resting order `id`, only if it sits at `price`.
    pub fn find(&self, id: OrderId, price: Option<f64>) -> Option<&Order> {
        let order = self.index.get(id)?;
        match (order.price, price) {
            (Some(resting), Some(wanted)) if (resting - wanted).abs() <= EPSILON => Some(order),
            (_, None) => Some(order),
            _ => None,
        }
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.index.contains(id)
    }

    pub fn get_aggregated_state(&self) -> Vec<LevelState> {
        self.index.aggregate()
    }

    /// Resting orders, best level first, FIFO within a level.
    pub fn orders(&self) -> Vec<Order> {
        self.index
            .prices()
            .into_iter()
            .flat_map(|price| self.index.orders_at(price).cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
