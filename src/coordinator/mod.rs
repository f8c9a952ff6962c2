//! Single-writer protocol: one worker per symbol, requests correlated by id.

pub mod messages;
pub mod settlement;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::engine::events::OrderEvent;
use crate::engine::types::{AggregatedState, OrderBookEvent, OrderBookState};
use crate::persist::PersistError;

pub use messages::{decode_request, DecodeError, Request, Response, ResponseBody, ResponsePayload, StateSnapshot};
pub use settlement::Collaborators;
pub use worker::{SymbolHandle, WorkerStatus};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("worker for {symbol} is unavailable")]
    WorkerUnavailable { symbol: String },
    #[error("no worker running for symbol {0}")]
    UnknownSymbol(String),
    #[error("worker for {0} is already running")]
    AlreadyRunning(String),
    #[error("bootstrap of {symbol} failed: {source}")]
    Bootstrap { symbol: String, source: PersistError },
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Owns every symbol worker of this process and routes requests to them.
pub struct EngineCoordinator {
    config: EngineConfig,
    collaborators: Collaborators,
    workers: RwLock<HashMap<String, Arc<SymbolHandle>>>,
}

impl EngineCoordinator {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        EngineCoordinator { config, collaborators, workers: RwLock::new(HashMap::new()) }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts the worker for `symbol` and waits until its book is bootstrapped.
    #[instrument(skip(self))]
    pub async fn start(&self, symbol: &str) -> Result<(), CoordinatorError> {
        if self.workers.read().contains_key(symbol) {
            return Err(CoordinatorError::AlreadyRunning(symbol.to_string()));
        }
        let handle = Arc::new(SymbolHandle::spawn(symbol, &self.config, self.collaborators.clone()).await?);

        let raced = {
            let mut workers = self.workers.write();
            if workers.contains_key(symbol) {
                true
            } else {
                workers.insert(symbol.to_string(), handle.clone());
                false
            }
        };
        if raced {
            handle.stop().await;
            return Err(CoordinatorError::AlreadyRunning(symbol.to_string()));
        }
        info!(symbol = symbol, "Worker started");
        Ok(())
    }

    /// Starts every configured symbol, stopping at the first failure.
    pub async fn start_all(&self) -> Result<(), CoordinatorError> {
        for symbol in self.config.symbols.clone() {
            self.start(&symbol).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, symbol: &str) -> Result<(), CoordinatorError> {
        let handle = self
            .workers
            .write()
            .remove(symbol)
            .ok_or_else(|| CoordinatorError::UnknownSymbol(symbol.to_string()))?;
        handle.stop().await;
        Ok(())
    }

    /// Throws away the in-memory book and rebuilds it from the order store.
    pub async fn recover(&self, symbol: &str) -> Result<(), CoordinatorError> {
        info!(symbol = symbol, "Recovering worker");
        match self.stop(symbol).await {
            Ok(()) | Err(CoordinatorError::UnknownSymbol(_)) => {}
            Err(e) => return Err(e),
        }
        self.start(symbol).await
    }

    pub async fn shutdown(&self) {
        let handles: Vec<Arc<SymbolHandle>> = self.workers.write().drain().map(|(_, h)| h).collect();
        futures::future::join_all(handles.iter().map(|h| h.stop())).await;
        info!(workers = handles.len(), "Coordinator shut down");
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.workers.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn status(&self, symbol: &str) -> Option<WorkerStatus> {
        self.workers.read().get(symbol).map(|h| h.status())
    }

    pub async fn call(&self, request: Request) -> Result<ResponseBody, CoordinatorError> {
        let handle = self
            .workers
            .read()
            .get(request.symbol())
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownSymbol(request.symbol().to_string()))?;
        handle.request(request).await
    }

    /// Sends a lifecycle event to its symbol's worker.
    pub async fn submit(&self, event: OrderEvent) -> Result<OrderBookEvent, CoordinatorError> {
        match self.call(Request::Event(event)).await? {
            ResponseBody::Event(event) => Ok(event),
            _ => Err(CoordinatorError::UnexpectedResponse("event")),
        }
    }

    pub async fn aggregated_state(&self, symbol: &str) -> Result<AggregatedState, CoordinatorError> {
        match self.call(Request::GetAggregatedState { symbol: symbol.to_string() }).await? {
            ResponseBody::AggregatedState(state) => Ok(state),
            _ => Err(CoordinatorError::UnexpectedResponse("GetAggregatedState")),
        }
    }

    pub async fn order_book_state(&self, symbol: &str) -> Result<OrderBookState, CoordinatorError> {
        match self.call(Request::GetOrderBookState { symbol: symbol.to_string() }).await? {
            ResponseBody::OrderBookState(state) => Ok(state),
            _ => Err(CoordinatorError::UnexpectedResponse("GetOrderBookState")),
        }
    }

    /// Decodes a front-end JSON request, runs it, and echoes the caller's id.
    pub async fn handle_json(&self, json: &str) -> Result<Response, CoordinatorError> {
        let (id, request) = decode_request(json)?;
        let kind = request.name();
        let symbol = request.symbol().to_string();
        let body = self.call(request).await?;
        Response::new(id, kind, body).ok_or(CoordinatorError::WorkerUnavailable { symbol })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{BookError, Order, OrderStatus, Side};
    use crate::ledger::{Ledger, MemoryLedger, SinkError};
    use crate::market_data::MemoryMarketData;
    use crate::persist::memory::MemoryOrderStore;
    use crate::persist::OrderStore;
    use std::time::Duration;

    const SYM: &str = "BTC-USD";

    struct Fixture {
        store: Arc<MemoryOrderStore>,
        ledger: Arc<MemoryLedger>,
        coordinator: EngineCoordinator,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let store = Arc::new(MemoryOrderStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let collaborators = Collaborators::new(store.clone(), ledger.clone(), Arc::new(MemoryMarketData::new(60_000)));
        Fixture { store, ledger, coordinator: EngineCoordinator::new(config, collaborators) }
    }

    fn test_config() -> EngineConfig {
        EngineConfig { symbols: vec![SYM.to_string()], request_timeout_ms: 2_000, restart_backoff_ms: 10, ..EngineConfig::default() }
    }

    // Ledger that takes its time, so settlement lags behind the worker.
    struct SlowLedger {
        inner: MemoryLedger,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Ledger for SlowLedger {
        async fn record(&self, symbol: &str, event: &OrderBookEvent) -> Result<(), SinkError> {
            tokio::time::sleep(self.delay).await;
            self.inner.record(symbol, event).await
        }
    }

    async fn place(f: &Fixture, order: Order) -> OrderBookEvent {
        f.store.insert(&order, OrderStatus::Placed).await.unwrap();
        f.coordinator.submit(OrderEvent::Placed { order }).await.unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_snapshot() {
        let f = fixture(test_config());
        f.coordinator.start(SYM).await.unwrap();

        place(&f, Order::limit(1, 10, SYM, Side::SELL, 100.0, 5.0)).await;
        let event = place(&f, Order::limit(2, 20, SYM, Side::BUY, 100.0, 2.0)).await;
        assert_eq!(event.matches.len(), 1);
        assert!(event.filled_completely);

        let state = f.coordinator.aggregated_state(SYM).await.unwrap();
        assert_eq!(state.asks[0].quantity, 5.0);
        assert_eq!(state.asks[0].filled_quantity, 2.0);
        assert_eq!(f.store.get(1).unwrap().1, OrderStatus::PartiallyFilled);
        assert_eq!(f.store.get(2).unwrap().1, OrderStatus::Filled);
        assert_eq!(f.ledger.events().len(), 2);

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_symbol_and_double_start() {
        let f = fixture(test_config());
        f.coordinator.start(SYM).await.unwrap();
        assert!(matches!(f.coordinator.start(SYM).await, Err(CoordinatorError::AlreadyRunning(_))));

        let order = Order::limit(1, 1, "ETH-USD", Side::BUY, 10.0, 1.0);
        let err = f.coordinator.submit(OrderEvent::Placed { order }).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownSymbol(s) if s == "ETH-USD"));
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_bootstrap_failure_prevents_start() {
        let f = fixture(test_config());
        f.store.set_unavailable(true);
        let err = f.coordinator.start(SYM).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Bootstrap { .. }));
        assert!(f.coordinator.symbols().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cancel_surfaces_rejection() {
        let f = fixture(test_config());
        f.coordinator.start(SYM).await.unwrap();
        let order = Order::limit(9, 1, SYM, Side::BUY, 100.0, 1.0);
        let event = f.coordinator.submit(OrderEvent::Canceled { order }).await.unwrap();
        assert!(event.reason.is_none());
        assert_eq!(event.rejection, Some(BookError::OrderNotFound { id: 9 }));
        assert!(f.ledger.events().is_empty());
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_submits_are_serialized() {
        let f = Arc::new(fixture(test_config()));
        f.coordinator.start(SYM).await.unwrap();
        place(&f, Order::limit(1, 10, SYM, Side::SELL, 100.0, 50.0)).await;

        let mut tasks = Vec::new();
        for i in 0..50u64 {
            let f = f.clone();
            tasks.push(tokio::spawn(async move {
                let order = Order::limit(100 + i, 20 + i, SYM, Side::BUY, 100.0, 1.0);
                f.coordinator.submit(OrderEvent::Placed { order }).await.unwrap()
            }));
        }
        let mut filled = 0.0;
        for t in tasks {
            let event = t.await.unwrap();
            filled += event.matches.iter().map(|m| m.quantity).sum::<f64>();
        }
        assert_eq!(filled, 50.0);
        let state = f.coordinator.aggregated_state(SYM).await.unwrap();
        assert!(state.asks.is_empty());
        assert!(state.bids.is_empty());
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_crash_restarts_and_rebuilds_from_store() {
        let f = fixture(test_config());
        f.coordinator.start(SYM).await.unwrap();
        place(&f, Order::limit(1, 10, SYM, Side::SELL, 101.0, 3.0)).await;

        let err = f.coordinator.call(Request::Poison { symbol: SYM.to_string() }).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::WorkerUnavailable { .. }));

        // The rebuilt book comes from the order store, which still has order 1.
        let state = f.coordinator.order_book_state(SYM).await.unwrap();
        assert_eq!(state.asks.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(f.coordinator.status(SYM), Some(WorkerStatus::Running));
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_crash_rebuild_sees_settled_fills() {
        let store = Arc::new(MemoryOrderStore::new());
        let ledger = Arc::new(SlowLedger { inner: MemoryLedger::new(), delay: Duration::from_millis(300) });
        let collaborators = Collaborators::new(store.clone(), ledger, Arc::new(MemoryMarketData::new(60_000)));
        let coordinator = EngineCoordinator::new(test_config(), collaborators);
        coordinator.start(SYM).await.unwrap();

        let sell = Order::limit(1, 10, SYM, Side::SELL, 100.0, 5.0);
        store.insert(&sell, OrderStatus::Placed).await.unwrap();
        coordinator.submit(OrderEvent::Placed { order: sell }).await.unwrap();

        // The buy is queued ahead of the crash; its settlement is still running when
        // the worker dies.
        let buy = Order::limit(2, 20, SYM, Side::BUY, 100.0, 5.0);
        store.insert(&buy, OrderStatus::Placed).await.unwrap();
        let (filled, crashed) = tokio::join!(
            coordinator.submit(OrderEvent::Placed { order: buy }),
            coordinator.call(Request::Poison { symbol: SYM.to_string() }),
        );
        assert!(filled.unwrap().filled_completely);
        assert!(matches!(crashed, Err(CoordinatorError::WorkerUnavailable { .. })));

        let state = coordinator.order_book_state(SYM).await.unwrap();
        assert!(state.bids.is_empty(), "filled bid came back: {:?}", state.bids);
        assert!(state.asks.is_empty(), "filled ask came back: {:?}", state.asks);
        assert_eq!(store.get(1).unwrap().1, OrderStatus::Filled);
        assert_eq!(store.get(2).unwrap().1, OrderStatus::Filled);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_limit_counts_consecutive_crashes() {
        let config = EngineConfig { max_restarts: 1, ..test_config() };
        let f = fixture(config);
        f.coordinator.start(SYM).await.unwrap();

        for _ in 0..3 {
            let _ = f.coordinator.call(Request::Poison { symbol: SYM.to_string() }).await;
            // A served request between crashes resets the count.
            f.coordinator.aggregated_state(SYM).await.unwrap();
        }
        assert_eq!(f.coordinator.status(SYM), Some(WorkerStatus::Running));
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_dies_after_restart_limit() {
        let config = EngineConfig { max_restarts: 0, ..test_config() };
        let f = fixture(config);
        f.coordinator.start(SYM).await.unwrap();

        let _ = f.coordinator.call(Request::Poison { symbol: SYM.to_string() }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.coordinator.status(SYM), Some(WorkerStatus::Dead));
        let err = f.coordinator.aggregated_state(SYM).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::WorkerUnavailable { .. }));
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_recover_reloads_store_state() {
        let f = fixture(test_config());
        f.coordinator.start(SYM).await.unwrap();
        // Written behind the worker's back; only visible after a rebuild.
        f.store.insert(&Order::limit(5, 1, SYM, Side::BUY, 99.0, 1.0), OrderStatus::Placed).await.unwrap();
        assert!(f.coordinator.aggregated_state(SYM).await.unwrap().bids.is_empty());

        f.coordinator.recover(SYM).await.unwrap();
        assert_eq!(f.coordinator.aggregated_state(SYM).await.unwrap().bids.len(), 1);
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_handle_json_echoes_id() {
        let f = fixture(test_config());
        f.coordinator.start(SYM).await.unwrap();
        let response = f.coordinator.handle_json(r#"{"id":77,"type":"GetAggregatedState","symbol":"BTC-USD"}"#).await.unwrap();
        assert_eq!(response.id, 77);
        assert_eq!(response.kind, "GetAggregatedState");
        assert!(matches!(response.payload, ResponsePayload::State { state: StateSnapshot::Aggregated(_) }));

        let err = f.coordinator.handle_json(r#"{"id":78,"type":"Teleport"}"#).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Decode(DecodeError::Book(BookError::UnknownEventType(_)))));
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_drains_queue() {
        let f = fixture(test_config());
        f.coordinator.start(SYM).await.unwrap();
        place(&f, Order::limit(1, 10, SYM, Side::SELL, 100.0, 1.0)).await;
        f.coordinator.stop(SYM).await.unwrap();
        assert!(f.coordinator.status(SYM).is_none());
        assert!(matches!(f.coordinator.stop(SYM).await, Err(CoordinatorError::UnknownSymbol(_))));
    }
}
