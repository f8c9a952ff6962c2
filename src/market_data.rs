use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::types::PriceTick;
use crate::ledger::SinkError;

/// One trade print.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    pub quantity: f64,
    pub timestamp: u64,
}

#[async_trait]
pub trait MarketDataSink: Send + Sync {
    async fn publish(&self, symbol: &str, tick: Tick) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub start: u64,
    pub ohlcv: PriceTick,
}

/// Buckets ticks into fixed-width OHLCV candles per symbol.
#[derive(Debug)]
pub struct MemoryMarketData {
    interval_ms: u64,
    candles: Mutex<AHashMap<String, Vec<Candle>>>,
}

impl MemoryMarketData {
    pub fn new(interval_ms: u64) -> Self {
        MemoryMarketData { interval_ms: interval_ms.max(1), candles: Mutex::new(AHashMap::new()) }
    }

    pub fn candles(&self, symbol: &str) -> Vec<Candle> {
        self.candles.lock().get(symbol).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl MarketDataSink for MemoryMarketData {
    async fn publish(&self, symbol: &str, tick: Tick) -> Result<(), SinkError> {
        let start = tick.timestamp - tick.timestamp % self.interval_ms;
        let mut candles = self.candles.lock();
        let series = candles.entry(symbol.to_string()).or_default();
        match series.last_mut() {
            Some(last) if last.start == start => last.ohlcv.record(tick.price, tick.quantity),
            _ => series.push(Candle { start, ohlcv: PriceTick::new(tick.price, tick.quantity) }),
        }
        Ok(())
    }
}
