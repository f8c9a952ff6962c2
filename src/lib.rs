//! Per-symbol limit order book matching engine.
//!
//! Each symbol's [`engine::OrderBook`] is owned by exactly one worker task; the
//! [`coordinator::EngineCoordinator`] funnels every request for that symbol
//! through the worker's queue, so matching for one symbol is never interleaved.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod ledger;
pub mod market_data;
pub mod persist;
pub mod telemetry;
