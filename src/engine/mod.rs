pub mod types;
pub mod events;
pub mod price_levels;
pub mod side;
pub mod book;

pub use book::OrderBook;
pub use events::OrderEvent;
pub use types::*;
