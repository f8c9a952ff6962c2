use serde::{Deserialize, Serialize};

use crate::engine::types::{Order, OrderId, Side};

/// Order lifecycle events accepted by a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum OrderEvent {
    Placed { order: Order },
    MarketPlaced { order: Order },
    /// `order.quantity` is the new quantity, `order.price` the resting price. Without
    /// `old_quantity` the resting quantity is reported as the old one.
    QuantityUpdated {
        order: Order,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_quantity: Option<f64>,
    },
    /// `order.price` is the new limit, `order.filled_quantity` what the sender believes has traded.
    LimitUpdated { order: Order, old_price: f64 },
    Canceled { order: Order },
}

impl OrderEvent {
    pub const TYPES: [&'static str; 5] = ["Placed", "MarketPlaced", "QuantityUpdated", "LimitUpdated", "Canceled"];

    pub fn order(&self) -> &Order {
        match self {
            OrderEvent::Placed { order }
            | OrderEvent::MarketPlaced { order }
            | OrderEvent::QuantityUpdated { order, .. }
            | OrderEvent::LimitUpdated { order, .. }
            | OrderEvent::Canceled { order } => order,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.order().symbol
    }

    pub fn order_id(&self) -> OrderId {
        self.order().id
    }

    pub fn side(&self) -> Side {
        self.order().side
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderEvent::Placed { .. } => "Placed",
            OrderEvent::MarketPlaced { .. } => "MarketPlaced",
            OrderEvent::QuantityUpdated { .. } => "QuantityUpdated",
            OrderEvent::LimitUpdated { .. } => "LimitUpdated",
            OrderEvent::Canceled { .. } => "Canceled",
        }
    }
}
