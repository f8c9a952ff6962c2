use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Quantities within this distance of zero are treated as zero.
pub const EPSILON: f64 = 1e-13;

pub type OrderId = u64;
pub type AccountId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    BUY,
    SELL
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::BUY => "BUY",
            Side::SELL => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
    // Declared for the order store schema, never accepted by the book
    Stop,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Stop => "STOP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Placed,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Statuses of orders that may be resting on a book.
    pub const ON_BOOK: [OrderStatus; 2] = [OrderStatus::Placed, OrderStatus::PartiallyFilled];

    pub fn is_on_book(self) -> bool {
        Self::ON_BOOK.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Placed => "PLACED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
        }
    }
}

// Order as submitted by the front end, and as held by the book while resting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub quantity: f64,
    pub filled_quantity: f64,
}

impl Order {
    pub fn limit(id: OrderId, account_id: AccountId, symbol: &str, side: Side, price: f64, quantity: f64) -> Self {
        Order {
            id,
            account_id,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
            filled_quantity: 0.0,
        }
    }

    pub fn market(id: OrderId, account_id: AccountId, symbol: &str, side: Side, quantity: f64) -> Self {
        Order {
            id,
            account_id,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            filled_quantity: 0.0,
        }
    }

    pub fn remaining(&self) -> f64 {
        self.quantity - self.filled_quantity
    }

    pub fn is_filled(&self) -> bool {
        self.remaining() <= EPSILON
    }

    /// Adds `qty` to the filled quantity, snapping to the nominal quantity
    /// when the leftover is dust.
    pub fn fill(&mut self, qty: f64) {
        self.filled_quantity += qty;
        if self.remaining() <= EPSILON {
            self.filled_quantity = self.quantity;
        }
    }

    pub fn status(&self) -> OrderStatus {
        if self.is_filled() {
            OrderStatus::Filled
        } else if self.filled_quantity > EPSILON {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Placed
        }
    }
}

// One pairing between the incoming order and a resting order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub taker_order_id: OrderId,
    pub taker_account_id: AccountId,
    pub maker_order_id: OrderId,
    pub maker_account_id: AccountId,
    pub taker_side: Side,
    pub price: f64,
    pub quantity: f64,
    pub maker_filled_quantity: f64,
    pub maker_filled_completely: bool,
}

/// Open/high/low/close/volume over the matches of one `try_to_match` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceTick {
    pub fn new(price: f64, quantity: f64) -> Self {
        PriceTick { open: price, high: price, low: price, close: price, volume: quantity }
    }

    pub fn record(&mut self, price: f64, quantity: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += quantity;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchReport {
    pub matches: Vec<MatchOutcome>,
    pub tick: Option<PriceTick>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReasonKind {
    Placed,
    Updated,
    Canceled,
}

/// What triggered an `OrderBookEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reason {
    #[serde(rename = "type")]
    pub kind: ReasonKind,
    pub order_id: OrderId,
    pub side: Side,
    pub price: Option<f64>,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_quantity: Option<f64>,
    pub filled_quantity: f64,
}

impl Reason {
    pub fn new(kind: ReasonKind, order: &Order) -> Self {
        Reason {
            kind,
            order_id: order.id,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            old_price: None,
            old_quantity: None,
            filled_quantity: order.filled_quantity,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookError {
    #[error("order symbol {got} does not belong to book {expected}")]
    SymbolMismatch { expected: String, got: String },
    #[error("order {id} not found")]
    OrderNotFound { id: OrderId },
    #[error("order {id} is already on the book")]
    DuplicateOrder { id: OrderId },
    #[error("quantity {quantity} is below filled quantity {filled}")]
    InvalidQuantity { quantity: f64, filled: f64 },
    #[error("stale update for order {id}: book has filled {book_filled}, request carries {request_filled}")]
    StaleUpdate { id: OrderId, book_filled: f64, request_filled: f64 },
    #[error("unknown event type {0}")]
    UnknownEventType(String),
    #[error("order type {0} is not supported")]
    UnsupportedOrderType(String),
    #[error("market order {id} left {remaining} unfilled")]
    RejectedMarketRemainder { id: OrderId, remaining: f64 },
}

/// The immutable outcome of one book operation. `reason == None` means the
/// operation failed and the book is unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookEvent {
    pub reason: Option<Reason>,
    pub matches: Vec<MatchOutcome>,
    pub filled_completely: bool,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rejection: Option<BookError>,
}

impl OrderBookEvent {
    pub fn success(reason: Reason, matches: Vec<MatchOutcome>, filled_completely: bool) -> Self {
        OrderBookEvent { reason: Some(reason), matches, filled_completely, timestamp: now_millis(), rejection: None }
    }

    pub fn failure(error: BookError) -> Self {
        OrderBookEvent { reason: None, matches: Vec::new(), filled_completely: false, timestamp: now_millis(), rejection: Some(error) }
    }

    pub fn is_success(&self) -> bool {
        self.reason.is_some()
    }
}

/// Per-price summary of one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelState {
    pub price: f64,
    pub quantity: f64,
    pub filled_quantity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedState {
    pub bids: Vec<LevelState>,
    pub asks: Vec<LevelState>,
}

// Full per-order snapshot, best level first on each side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookState {
    pub symbol: String,
    pub bids: Vec<Order>,
    pub asks: Vec<Order>,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_snaps_dust() {
        let mut order = Order::limit(1, 7, "BTC-USD", Side::BUY, 100.0, 0.3);
        order.fill(0.1);
        order.fill(0.2);
        assert!(order.is_filled());
        assert_eq!(order.filled_quantity, order.quantity);
        assert_eq!(order.status(), OrderStatus::Filled);
    }

    #[test]
    fn test_status_progression() {
        let mut order = Order::limit(1, 7, "BTC-USD", Side::SELL, 100.0, 10.0);
        assert_eq!(order.status(), OrderStatus::Placed);
        order.fill(4.0);
        assert_eq!(order.status(), OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining(), 6.0);
    }

    #[test]
    fn test_price_tick_record() {
        let mut tick = PriceTick::new(100.0, 5.0);
        tick.record(101.0, 10.0);
        tick.record(99.5, 1.0);
        assert_eq!(tick.open, 100.0);
        assert_eq!(tick.high, 101.0);
        assert_eq!(tick.low, 99.5);
        assert_eq!(tick.close, 99.5);
        assert_eq!(tick.volume, 16.0);
    }

    #[test]
    fn test_reason_serializes_type_tag() {
        let order = Order::limit(3, 1, "ETH-USD", Side::SELL, 12.5, 2.0);
        let json = serde_json::to_value(Reason::new(ReasonKind::Canceled, &order)).unwrap();
        assert_eq!(json["type"], "CANCELED");
        assert_eq!(json["side"], "SELL");
        assert_eq!(json["orderId"], 3);
        assert_eq!(json["filledQuantity"], 0.0);
        assert!(json.get("oldPrice").is_none());
    }
}
