//! One symbol's single writer.
//!
//! ```text
//!  callers ──request()──► queue (bounded mpsc) ──► worker task (owns OrderBook)
//!     ▲                                                 │
//!     └── oneshot ◄── pending[id] ◄── dispatcher ◄── replies
//! ```
//!
//! The supervisor bootstraps the book, runs the worker, and on a crash fails the
//! in-flight request, waits for the dispatcher to settle every reply the dead worker
//! sent, rebuilds the book from the order store and resumes draining the same queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::EngineConfig;
use crate::coordinator::messages::{Envelope, Request, ResponseBody};
use crate::coordinator::settlement::Collaborators;
use crate::coordinator::CoordinatorError;
use crate::engine::book::OrderBook;
use crate::persist::PersistError;
use crate::telemetry::{MATCHES_TOTAL, MATCH_LATENCY_US, REJECTIONS_TOTAL, REQUESTS_TOTAL, WORKER_RESTARTS_TOTAL};

type PendingTable = Mutex<HashMap<u64, oneshot::Sender<ResponseBody>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerStatus {
    Starting = 0,
    Running = 1,
    Restarting = 2,
    Stopped = 3,
    Dead = 4,
}

impl WorkerStatus {
    fn from_u8(v: u8) -> WorkerStatus {
        match v {
            0 => WorkerStatus::Starting,
            1 => WorkerStatus::Running,
            2 => WorkerStatus::Restarting,
            3 => WorkerStatus::Stopped,
            _ => WorkerStatus::Dead,
        }
    }
}

#[derive(Debug)]
enum Reply {
    Response { id: u64, body: ResponseBody },
    // Fired once every reply queued ahead of it has been settled
    Barrier(oneshot::Sender<()>),
}

// State shared by the supervisor, the worker and the handle
struct Shared {
    symbol: String,
    status: AtomicU8,
    // Correlation id the worker is processing, 0 when idle
    in_flight: AtomicU64,
    restarts: AtomicU64,
    // Set once the current worker has answered a request
    progressed: AtomicBool,
}

impl Shared {
    fn set_status(&self, status: WorkerStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }
}

/// Front-end handle of one symbol worker.
pub struct SymbolHandle {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::Sender<Envelope>>>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    timeout: Duration,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl SymbolHandle {
    /// Spawns the supervisor and dispatcher, and resolves once the book has been
    /// bootstrapped. A failed bootstrap tears everything down again.
    pub async fn spawn(symbol: &str, config: &EngineConfig, collaborators: Collaborators) -> Result<SymbolHandle, CoordinatorError> {
        let (queue_tx, queue_rx) = mpsc::channel::<Envelope>(config.queue_capacity.max(1));
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>(config.queue_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();

        let shared = Arc::new(Shared {
            symbol: symbol.to_string(),
            status: AtomicU8::new(WorkerStatus::Starting as u8),
            in_flight: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            progressed: AtomicBool::new(false),
        });
        let pending: Arc<PendingTable> = Arc::new(Mutex::new(HashMap::new()));

        let span = tracing::info_span!("symbol_worker", symbol = symbol);
        let supervisor = tokio::spawn(
            supervise(
                shared.clone(),
                Arc::new(tokio::sync::Mutex::new(queue_rx)),
                reply_tx,
                collaborators.clone(),
                config.max_restarts,
                config.restart_backoff(),
                ready_tx,
            )
            .instrument(span.clone()),
        );
        let dispatcher = tokio::spawn(dispatch(shared.clone(), reply_rx, pending.clone(), collaborators).instrument(span));

        let handle = SymbolHandle {
            shared,
            queue: Mutex::new(Some(queue_tx)),
            pending,
            next_id: AtomicU64::new(1),
            timeout: config.request_timeout(),
            tasks: Mutex::new(Some((supervisor, dispatcher))),
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                handle.stop().await;
                Err(CoordinatorError::Bootstrap { symbol: symbol.to_string(), source: e })
            }
            Err(_) => {
                handle.stop().await;
                Err(CoordinatorError::WorkerUnavailable { symbol: symbol.to_string() })
            }
        }
    }

    pub fn symbol(&self) -> &str {
        &self.shared.symbol
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.shared.status.load(Ordering::SeqCst))
    }

    pub fn restarts(&self) -> u64 {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    /// Queues `request` under a fresh correlation id and waits for its reply,
    /// bounded by the request timeout.
    pub async fn request(&self, request: Request) -> Result<ResponseBody, CoordinatorError> {
        let unavailable = || CoordinatorError::WorkerUnavailable { symbol: self.shared.symbol.clone() };
        let queue = self.queue.lock().clone().ok_or_else(unavailable)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        metrics::counter!(REQUESTS_TOTAL, "symbol" => self.shared.symbol.clone()).increment(1);
        debug!(symbol = %self.shared.symbol, id = id, request = request.name(), "Queued request");

        let exchange = async {
            queue.send(Envelope { id, request }).await.map_err(|_| ())?;
            rx.await.map_err(|_| ())
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(ResponseBody::Unavailable)) | Ok(Err(())) => {
                self.pending.lock().remove(&id);
                Err(unavailable())
            }
            Ok(Ok(body)) => Ok(body),
            Err(_) => {
                self.pending.lock().remove(&id);
                warn!(symbol = %self.shared.symbol, id = id, timeout_ms = self.timeout.as_millis() as u64, "Request timed out");
                Err(unavailable())
            }
        }
    }

    /// Closes the queue, lets the worker finish what is already queued, and waits
    /// for its tasks to exit.
    pub async fn stop(&self) {
        self.queue.lock().take();
        let tasks = self.tasks.lock().take();
        if let Some((supervisor, dispatcher)) = tasks {
            if let Err(e) = supervisor.await {
                error!(symbol = %self.shared.symbol, error = %e, "Supervisor task failed");
            }
            if let Err(e) = dispatcher.await {
                error!(symbol = %self.shared.symbol, error = %e, "Dispatcher task failed");
            }
        }
        if self.status() != WorkerStatus::Dead {
            self.shared.set_status(WorkerStatus::Stopped);
        }
        info!(symbol = %self.shared.symbol, "Worker stopped");
    }
}

async fn supervise(
    shared: Arc<Shared>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope>>>,
    replies: mpsc::Sender<Reply>,
    collaborators: Collaborators,
    max_restarts: u32,
    backoff: Duration,
    ready: oneshot::Sender<Result<(), PersistError>>,
) {
    let mut ready = Some(ready);
    let mut failures: u32 = 0;

    loop {
        let book = match OrderBook::bootstrap(&shared.symbol, collaborators.store.as_ref()).await {
            Ok(book) => book,
            Err(e) => {
                error!(symbol = %shared.symbol, error = %e, "Bootstrap failed");
                if let Some(tx) = ready.take() {
                    shared.set_status(WorkerStatus::Dead);
                    let _ = tx.send(Err(e));
                    return;
                }
                failures += 1;
                if failures > max_restarts {
                    give_up(&shared, &queue, &replies).await;
                    return;
                }
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        shared.set_status(WorkerStatus::Running);
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }

        let worker = tokio::spawn(run_worker(book, shared.clone(), queue.clone(), replies.clone()).in_current_span());
        match worker.await {
            Ok(()) => {
                info!(symbol = %shared.symbol, "Worker drained its queue");
                return;
            }
            Err(e) => {
                // Only consecutive crashes count towards the limit.
                if shared.progressed.swap(false, Ordering::SeqCst) {
                    failures = 0;
                }
                failures += 1;
                shared.restarts.fetch_add(1, Ordering::SeqCst);
                metrics::counter!(WORKER_RESTARTS_TOTAL, "symbol" => shared.symbol.clone()).increment(1);
                error!(symbol = %shared.symbol, error = %e, failures = failures, "Worker crashed, rebuilding book from order store");

                let id = shared.in_flight.swap(0, Ordering::SeqCst);
                if id != 0 {
                    let _ = replies.send(Reply::Response { id, body: ResponseBody::Unavailable }).await;
                }
                settled(&replies).await;
                if failures > max_restarts {
                    give_up(&shared, &queue, &replies).await;
                    return;
                }
                shared.set_status(WorkerStatus::Restarting);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

// Resolves once the dispatcher has settled everything sent before this call, so a
// rebuilt book sees the store write-backs of the previous worker.
async fn settled(replies: &mpsc::Sender<Reply>) {
    let (tx, rx) = oneshot::channel();
    if replies.send(Reply::Barrier(tx)).await.is_ok() {
        let _ = rx.await;
    }
}

// Marks the worker dead and fails everything still queued.
async fn give_up(shared: &Shared, queue: &tokio::sync::Mutex<mpsc::Receiver<Envelope>>, replies: &mpsc::Sender<Reply>) {
    error!(symbol = %shared.symbol, "Restart limit reached, worker is dead");
    shared.set_status(WorkerStatus::Dead);
    let mut queue = queue.lock().await;
    queue.close();
    while let Some(envelope) = queue.recv().await {
        let _ = replies.send(Reply::Response { id: envelope.id, body: ResponseBody::Unavailable }).await;
    }
}

async fn run_worker(
    mut book: OrderBook,
    shared: Arc<Shared>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope>>>,
    replies: mpsc::Sender<Reply>,
) {
    let mut queue = queue.lock().await;
    while let Some(Envelope { id, request }) = queue.recv().await {
        shared.in_flight.store(id, Ordering::SeqCst);
        let body = match request {
            Request::Event(event) => {
                let start_time = Instant::now();
                let outcome = book.process(event);
                metrics::histogram!(MATCH_LATENCY_US).record(start_time.elapsed().as_micros() as f64);
                if outcome.is_success() {
                    metrics::counter!(MATCHES_TOTAL, "symbol" => shared.symbol.clone()).increment(outcome.matches.len() as u64);
                } else {
                    metrics::counter!(REJECTIONS_TOTAL, "symbol" => shared.symbol.clone()).increment(1);
                }
                ResponseBody::Event(outcome)
            }
            Request::GetAggregatedState { .. } => ResponseBody::AggregatedState(book.get_aggregated_state()),
            Request::GetOrderBookState { .. } => ResponseBody::OrderBookState(book.get_order_book_state()),
            #[cfg(test)]
            Request::Poison { .. } => panic!("poisoned worker"),
            #[cfg(test)]
            Request::Stall { millis, .. } => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                ResponseBody::AggregatedState(book.get_aggregated_state())
            }
        };
        shared.in_flight.store(0, Ordering::SeqCst);
        if replies.send(Reply::Response { id, body }).await.is_err() {
            warn!(symbol = %shared.symbol, "Reply channel closed, worker exiting");
            break;
        }
        shared.progressed.store(true, Ordering::SeqCst);
    }
}

// Runs collaborator side effects in worker order, then wakes the caller.
async fn dispatch(
    shared: Arc<Shared>,
    mut replies: mpsc::Receiver<Reply>,
    pending: Arc<PendingTable>,
    collaborators: Collaborators,
) {
    while let Some(reply) = replies.recv().await {
        let (id, body) = match reply {
            Reply::Response { id, body } => (id, body),
            Reply::Barrier(done) => {
                let _ = done.send(());
                continue;
            }
        };
        if let ResponseBody::Event(event) = &body {
            collaborators.settle(&shared.symbol, event).await;
        }
        let waiter = pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(body);
            }
            None => debug!(symbol = %shared.symbol, id = id, "No caller waiting for reply"),
        }
    }
    // Anyone still waiting will never get an answer.
    pending.lock().clear();
}
