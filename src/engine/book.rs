use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::engine::events::OrderEvent;
use crate::engine::side::{BookSide, SideKind};
use crate::engine::types::{
    AggregatedState, BookError, MatchReport, Order, OrderBookEvent, OrderBookState, OrderType, Reason, ReasonKind,
    Side, EPSILON,
};
use crate::persist::{OrderStore, PersistResult};

/// Both sides of one symbol's book. All mutation goes through [`OrderBook::process`].
#[derive(Debug)]
pub struct OrderBook {
    symbol: String,
    bids: BookSide,
    asks: BookSide,
}

impl OrderBook {
    pub fn new(symbol: &str) -> Self {
        OrderBook {
            symbol: symbol.to_string(),
            bids: BookSide::new(SideKind::Bid),
            asks: BookSide::new(SideKind::Ask),
        }
    }

    /// Rebuilds the book from the orders still active in the store. Store order is
    /// taken as time priority.
    #[instrument(skip(store))]
    pub async fn bootstrap(symbol: &str, store: &dyn OrderStore) -> PersistResult<Self> {
        let mut book = OrderBook::new(symbol);
        let orders = store.active_orders_of_symbol(symbol).await?;
        let total = orders.len();
        let mut skipped = 0;
        for order in orders {
            if order.order_type != OrderType::Limit || order.is_filled() {
                warn!(id = order.id, order_type = ?order.order_type, "Skipping non-restable order during bootstrap");
                skipped += 1;
                continue;
            }
            if let Err(e) = book.side_mut(SideKind::of(order.side)).put_order_on_book(order) {
                warn!(error = %e, "Skipping order during bootstrap");
                skipped += 1;
            }
        }
        if book.is_crossed() {
            warn!(symbol = symbol, best_bid = ?book.best_bid(), best_ask = ?book.best_ask(), "Order store holds a crossed book");
        }
        info!(symbol = symbol, loaded = total - skipped, skipped = skipped, "Order book bootstrapped");
        Ok(book)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Applies one event. Failures come back as an event with no reason; the book is
    /// left as it was.
    #[instrument(skip(self, event), fields(symbol = %self.symbol, event = event.name(), order_id = event.order_id()))]
    pub fn process(&mut self, event: OrderEvent) -> OrderBookEvent {
        let start_time = Instant::now();

        let result = if event.symbol() != self.symbol {
            Err(BookError::SymbolMismatch { expected: self.symbol.clone(), got: event.symbol().to_string() })
        } else {
            match event {
                OrderEvent::Placed { order } => self.place_limit(order, ReasonKind::Placed),
                OrderEvent::MarketPlaced { order } => self.place_market(order),
                OrderEvent::QuantityUpdated { order, old_quantity } => self.update_quantity(order, old_quantity),
                OrderEvent::LimitUpdated { order, old_price } => self.update_limit(order, old_price),
                OrderEvent::Canceled { order } => self.cancel(order),
            }
        };

        let outcome = result.unwrap_or_else(|e| {
            warn!(error = %e, "Operation rejected");
            OrderBookEvent::failure(e)
        });
        if self.is_crossed() {
            error!(best_bid = ?self.best_bid(), best_ask = ?self.best_ask(), "Book is crossed after operation");
        }
        debug!(
            processing_time_ns = start_time.elapsed().as_nanos() as u64,
            matches = outcome.matches.len(),
            "Event processed"
        );
        outcome
    }

    fn place_limit(&mut self, mut order: Order, kind: ReasonKind) -> Result<OrderBookEvent, BookError> {
        match order.order_type {
            OrderType::Limit => {}
            OrderType::Market => return self.place_market(order),
            OrderType::Stop => return Err(BookError::UnsupportedOrderType(order.order_type.as_str().to_string())),
        }
        if order.price.is_none() {
            return Err(BookError::UnsupportedOrderType("LIMIT without price".to_string()));
        }
        if order.quantity <= EPSILON || order.filled_quantity > order.quantity + EPSILON {
            return Err(BookError::InvalidQuantity { quantity: order.quantity, filled: order.filled_quantity });
        }
        if self.bids.contains(order.id) || self.asks.contains(order.id) {
            return Err(BookError::DuplicateOrder { id: order.id });
        }

        let report = self.opposite_mut(order.side).try_to_match(&mut order);
        Self::log_report(&order, &report);

        let filled_completely = order.is_filled();
        let reason = Reason::new(kind, &order);
        if !filled_completely {
            debug!(id = order.id, remaining = order.remaining(), "Resting limit order");
            self.side_mut(SideKind::of(order.side)).put_order_on_book(order)?;
        }
        Ok(OrderBookEvent::success(reason, report.matches, filled_completely))
    }

    fn place_market(&mut self, mut order: Order) -> Result<OrderBookEvent, BookError> {
        if order.quantity <= EPSILON {
            return Err(BookError::InvalidQuantity { quantity: order.quantity, filled: order.filled_quantity });
        }
        let report = self.opposite_mut(order.side).try_to_match(&mut order);
        Self::log_report(&order, &report);

        let filled_completely = order.is_filled();
        if !filled_completely {
            let remainder = BookError::RejectedMarketRemainder { id: order.id, remaining: order.remaining() };
            warn!(id = order.id, filled = order.filled_quantity, "{}", remainder);
        }
        let reason = Reason::new(ReasonKind::Placed, &order);
        Ok(OrderBookEvent::success(reason, report.matches, filled_completely))
    }

    fn update_quantity(&mut self, order: Order, old_quantity: Option<f64>) -> Result<OrderBookEvent, BookError> {
        let side = self.side_mut(SideKind::of(order.side));
        let resting = side.find(order.id, order.price).ok_or(BookError::OrderNotFound { id: order.id })?;
        let filled = resting.filled_quantity;
        let old_quantity = old_quantity.unwrap_or(resting.quantity);

        side.update_quantity(order.id, order.quantity)?;

        let mut updated = side.find(order.id, None).cloned().ok_or(BookError::OrderNotFound { id: order.id })?;
        let filled_completely = updated.remaining() <= EPSILON;
        if filled_completely {
            // Shrunk to exactly what has traded; nothing left to rest.
            side.remove_order(order.id)?;
            updated.filled_quantity = updated.quantity;
            debug!(id = order.id, "Quantity update completed the order");
        }

        let mut reason = Reason::new(ReasonKind::Updated, &updated);
        reason.old_quantity = Some(old_quantity);
        reason.filled_quantity = filled.min(updated.quantity);
        Ok(OrderBookEvent::success(reason, Vec::new(), filled_completely))
    }

    fn update_limit(&mut self, order: Order, old_price: f64) -> Result<OrderBookEvent, BookError> {
        let new_price = order.price.ok_or_else(|| BookError::UnsupportedOrderType("LIMIT without price".to_string()))?;
        let side = self.side_mut(SideKind::of(order.side));
        let resting = side.find(order.id, Some(old_price)).ok_or(BookError::OrderNotFound { id: order.id })?;

        if (resting.filled_quantity - order.filled_quantity).abs() > EPSILON {
            return Err(BookError::StaleUpdate {
                id: order.id,
                book_filled: resting.filled_quantity,
                request_filled: order.filled_quantity,
            });
        }
        if order.quantity <= EPSILON || order.quantity < resting.filled_quantity - EPSILON {
            return Err(BookError::InvalidQuantity { quantity: order.quantity, filled: resting.filled_quantity });
        }

        let mut replacement = side.remove_order(order.id)?;
        let old_quantity = replacement.quantity;
        replacement.price = Some(new_price);
        replacement.quantity = order.quantity;
        debug!(id = order.id, old_price = old_price, new_price = new_price, "Re-placing order at new limit");

        let mut event = self.place_limit(replacement, ReasonKind::Updated)?;
        if let Some(reason) = event.reason.as_mut() {
            reason.old_price = Some(old_price);
            reason.old_quantity = Some(old_quantity);
        }
        Ok(event)
    }

    fn cancel(&mut self, order: Order) -> Result<OrderBookEvent, BookError> {
        let side = self.side_mut(SideKind::of(order.side));
        if side.find(order.id, order.price).is_none() {
            return Err(BookError::OrderNotFound { id: order.id });
        }
        let removed = side.remove_order(order.id)?;
        debug!(id = removed.id, filled = removed.filled_quantity, "Canceled resting order");
        Ok(OrderBookEvent::success(Reason::new(ReasonKind::Canceled, &removed), Vec::new(), false))
    }

    pub fn get_aggregated_state(&self) -> AggregatedState {
        AggregatedState { bids: self.bids.get_aggregated_state(), asks: self.asks.get_aggregated_state() }
    }

    pub fn get_order_book_state(&self) -> OrderBookState {
        OrderBookState { symbol: self.symbol.clone(), bids: self.bids.orders(), asks: self.asks.orders() }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.best_price()
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.best_price()
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    pub fn is_crossed(&self) -> bool {
        matches!((self.best_bid(), self.best_ask()), (Some(bid), Some(ask)) if bid >= ask)
    }

    /// Number of resting orders on (bids, asks).
    pub fn resting_counts(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    fn side_mut(&mut self, kind: SideKind) -> &mut BookSide {
        match kind {
            SideKind::Bid => &mut self.bids,
            SideKind::Ask => &mut self.asks,
        }
    }

    // The side an incoming order of `side` matches against
    fn opposite_mut(&mut self, side: Side) -> &mut BookSide {
        self.side_mut(SideKind::of(side.opposite()))
    }

    fn log_report(order: &Order, report: &MatchReport) {
        if let Some(tick) = report.tick {
            debug!(
                id = order.id,
                matches = report.matches.len(),
                open = tick.open,
                high = tick.high,
                low = tick.low,
                close = tick.close,
                volume = tick.volume,
                "Matched"
            );
        } else if order.order_type == OrderType::Market {
            warn!(id = order.id, "Market order found no liquidity");
        }
    }
}
