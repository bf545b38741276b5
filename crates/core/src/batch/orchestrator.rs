//! Batch orchestrator implementation.
//!
//! Owns the pending window and the in-flight table:
//! - `add_request` dedups by fingerprint under one lock and registers waiters
//! - A collation loop drains the pending window on a fixed interval and
//!   hands each non-empty window to the processor in its own task
//! - Resolved results go to the cache first, then to every waiter

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::chat::ChatCompletionRequest;
use crate::config::ServingMode;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::metrics;
use crate::store::BatchStore;

use super::config::{BatchingConfig, RecoveryConfig};
use super::processor::BatchProcessor;
use super::slot::{Delivery, ResultReceiver, ResultSlot};
use super::types::{
    BatchItem, BatchOutcome, BatchResult, ErrorKind, OrchestratorStatus, ProcessError,
    RecoverySummary, ResultError,
};

/// Shortest collation interval accepted by the timer.
const MIN_COLLATION_WINDOW: Duration = Duration::from_millis(1);

/// Waiters registered for one in-flight fingerprint.
#[derive(Debug, Default)]
pub(super) struct InFlight {
    pub(super) waiters: Vec<ResultSlot>,
}

/// Bookkeeping guarded by the orchestrator lock.
///
/// Every pending fingerprint is also in flight.
#[derive(Debug, Default)]
pub(super) struct State {
    pub(super) pending: HashMap<Fingerprint, ChatCompletionRequest>,
    pub(super) in_flight: HashMap<Fingerprint, InFlight>,
}

pub(super) struct Shared {
    state: Mutex<State>,
    pub(super) processor: Arc<dyn BatchProcessor>,
    pub(super) cache: Arc<dyn ResultCache>,
    pub(super) status_log: Arc<dyn BatchStore>,
    serving_mode: ServingMode,
    batching: BatchingConfig,
    recovery: RecoveryConfig,
    pub(super) cancel: CancellationToken,
    tasks: TaskTracker,
    running: AtomicBool,
}

/// The batch orchestrator.
///
/// Constructed once at startup with its collaborators and shared by
/// reference (typically behind an `Arc`) with the HTTP layer.
pub struct BatchOrchestrator {
    shared: Arc<Shared>,
}

impl BatchOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        processor: Arc<dyn BatchProcessor>,
        cache: Arc<dyn ResultCache>,
        status_log: Arc<dyn BatchStore>,
        serving_mode: ServingMode,
        batching: BatchingConfig,
        recovery: RecoveryConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                processor,
                cache,
                status_log,
                serving_mode,
                batching,
                recovery,
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn serving_mode(&self) -> ServingMode {
        self.shared.serving_mode
    }

    /// Register a request and get the conduit its result arrives on.
    ///
    /// Never blocks on the provider. In sync mode the receiver resolves when
    /// the batch holding the fingerprint does; in async mode it already holds
    /// `Accepted`; in cache-only mode it holds the cached response or a
    /// `not_found` error.
    pub fn add_request(&self, request: ChatCompletionRequest) -> ResultReceiver {
        let shared = &self.shared;

        let fp = match fingerprint(&request) {
            Ok(fp) => fp,
            Err(e) => {
                metrics::REQUESTS_TOTAL
                    .with_label_values(&["fingerprint_error"])
                    .inc();
                warn!("Failed to fingerprint request: {}", e);
                return ResultReceiver::ready(BatchResult::failed(
                    ErrorKind::Fingerprint,
                    e.to_string(),
                ));
            }
        };

        if let Some(response) = shared.cache.lookup(&fp) {
            metrics::REQUESTS_TOTAL.with_label_values(&["cache_hit"]).inc();
            debug!("Cache hit for {}", fp.short());
            return ResultReceiver::ready(BatchResult::Completed(response));
        }

        if shared.serving_mode == ServingMode::CacheOnly {
            metrics::REQUESTS_TOTAL.with_label_values(&["cache_miss"]).inc();
            debug!("Cache miss for {} in cache-only mode", fp.short());
            return ResultReceiver::ready(BatchResult::failed(
                ErrorKind::NotFound,
                format!("no cached response for request {}", fp),
            ));
        }

        if shared.cancel.is_cancelled() {
            return ResultReceiver::ready(BatchResult::abandoned("orchestrator is shut down"));
        }

        let mut guard = shared.lock();
        let state = &mut *guard;

        let (entry, coalesced) = match state.in_flight.entry(fp.clone()) {
            Entry::Occupied(occupied) => (occupied.into_mut(), true),
            Entry::Vacant(vacant) => {
                // The window holding this fingerprint may have resolved since
                // the first lookup; resolve caches before taking the lock.
                if let Some(response) = shared.cache.lookup(&fp) {
                    metrics::REQUESTS_TOTAL.with_label_values(&["cache_hit"]).inc();
                    debug!("Cache hit for {} after its window resolved", fp.short());
                    return ResultReceiver::ready(BatchResult::Completed(response));
                }
                state.pending.insert(fp.clone(), request);
                (vacant.insert(InFlight::default()), false)
            }
        };

        let outcome = if coalesced { "coalesced" } else { "queued" };
        metrics::REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
        debug!("Request {} {}", fp.short(), outcome);

        if shared.serving_mode == ServingMode::Async {
            return ResultReceiver::ready(BatchResult::Accepted);
        }

        let (slot, receiver) = ResultSlot::channel();
        entry.waiters.push(slot);
        receiver
    }

    /// Flush the pending window now and process it to completion.
    ///
    /// Returns the number of distinct requests submitted.
    pub async fn process_pending(&self) -> usize {
        let items = self.shared.drain_pending();
        let count = items.len();
        if count > 0 {
            self.shared.process_window(items).await;
        }
        count
    }

    /// Resume every batch whose latest logged status is non-terminal.
    pub async fn recover_dangling_batches(&self) -> RecoverySummary {
        self.shared.recover_dangling_batches().await
    }

    /// Start the orchestrator (spawns background tasks).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.shared.cancel.is_cancelled() {
            warn!("Orchestrator was stopped and cannot be restarted");
            return;
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!(
            "Starting batch orchestrator (mode: {})",
            self.shared.serving_mode
        );

        if self.shared.should_recover() {
            let shared = Arc::clone(&self.shared);
            self.shared.tasks.spawn(async move {
                shared.recover_dangling_batches().await;
            });
        } else {
            info!("Startup recovery disabled");
        }

        if self.shared.serving_mode.submits_work() {
            Shared::spawn_collation_loop(&self.shared);
        }

        info!("Batch orchestrator started");
    }

    /// Stop the orchestrator gracefully.
    ///
    /// Cancels polling, waits for every window and recovery task, then
    /// delivers `abandoned` to whoever is still waiting. Batches cut short
    /// stay non-terminal in the status log and are recovered on next start.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping batch orchestrator");

        self.shared.cancel.cancel();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;

        let abandoned = self.shared.abandon_all("orchestrator shut down");
        info!(
            "Batch orchestrator stopped ({} unresolved requests abandoned)",
            abandoned
        );
    }

    /// Get current orchestrator status.
    pub fn status(&self) -> OrchestratorStatus {
        let state = self.shared.lock();
        OrchestratorStatus {
            running: self.shared.running.load(Ordering::Relaxed),
            serving_mode: self.shared.serving_mode,
            pending_count: state.pending.len(),
            in_flight_count: state.in_flight.len(),
            waiter_count: state.in_flight.values().map(|e| e.waiters.len()).sum(),
        }
    }
}

impl Shared {
    /// Take the orchestrator lock. A panic while holding it cannot leave the
    /// maps half-updated, so poisoning is ignored.
    pub(super) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn should_recover(&self) -> bool {
        if !self.recovery.on_startup {
            return false;
        }
        self.serving_mode.submits_work() || self.recovery.in_cache_only_mode
    }

    /// Swap the pending window for an empty one.
    fn drain_pending(&self) -> Vec<BatchItem> {
        let mut state = self.lock();
        std::mem::take(&mut state.pending)
            .into_iter()
            .map(|(fp, request)| BatchItem::new(fp, request))
            .collect()
    }

    /// Spawn the collation loop task.
    fn spawn_collation_loop(shared: &Arc<Shared>) {
        let this = Arc::clone(shared);
        let window = shared.batching.collation_window().max(MIN_COLLATION_WINDOW);

        shared.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + window, window);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Collation loop started (window: {:?})", window);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => {
                        info!("Collation loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let items = this.drain_pending();
                        if items.is_empty() {
                            continue;
                        }
                        let worker = Arc::clone(&this);
                        this.tasks.spawn(async move {
                            worker.process_window(items).await;
                        });
                    }
                }
            }
            info!("Collation loop stopped");
        });
    }

    /// Submit and poll one drained window, then fan out its results.
    async fn process_window(&self, items: Vec<BatchItem>) {
        metrics::WINDOW_SIZE.observe(items.len() as f64);

        if self.cancel.is_cancelled() {
            self.fan_out_error(
                &items,
                ResultError::new(ErrorKind::Abandoned, "orchestrator shut down before submission"),
            );
            return;
        }

        info!("Flushing window with {} distinct requests", items.len());
        let outcome = self.processor.process_batch(&items, &self.cancel).await;
        self.resolve(&items, outcome);
    }

    /// Cache and fan out the outcome of a batch.
    pub(super) fn resolve(&self, items: &[BatchItem], outcome: Result<BatchOutcome, ProcessError>) {
        let mut responses = match outcome {
            Ok(responses) => responses,
            Err(e) => {
                warn!("Batch of {} requests failed: {}", items.len(), e);
                self.fan_out_error(items, e.to_result_error());
                return;
            }
        };

        // Cache first so a request arriving after fan-out hits the cache
        for item in items {
            if let Some(response) = responses.get(&item.fingerprint) {
                self.cache.store(&item.fingerprint, &item.request, response);
            }
        }

        let mut delivered = 0;
        {
            let mut state = self.lock();
            for item in items {
                let result = match responses.remove(&item.fingerprint) {
                    Some(response) => BatchResult::Completed(response),
                    None => BatchResult::failed(
                        ErrorKind::BatchFailed,
                        format!("batch output has no line for request {}", item.fingerprint),
                    ),
                };
                delivered += fan_out(&mut state, &item.fingerprint, result);
            }
        }

        for fp in responses.keys() {
            warn!("Ignoring output line for {} not submitted in this batch", fp.short());
        }

        info!(
            "Resolved {} requests ({} waiters notified)",
            items.len(),
            delivered
        );
    }

    fn fan_out_error(&self, items: &[BatchItem], error: ResultError) {
        let mut state = self.lock();
        for item in items {
            fan_out(
                &mut state,
                &item.fingerprint,
                BatchResult::Failed(error.clone()),
            );
        }
    }

    /// Deliver `abandoned` to everything still in flight and clear the maps.
    fn abandon_all(&self, message: &str) -> usize {
        let mut state = self.lock();
        state.pending.clear();

        let abandoned = state.in_flight.len();
        for (_, entry) in state.in_flight.drain() {
            for mut slot in entry.waiters {
                slot.deliver(BatchResult::abandoned(message));
            }
        }
        abandoned
    }
}

/// Resolve one fingerprint: remove it from the window and the in-flight
/// table and write the result to each of its waiters.
///
/// Returns the number of waiters that received the result. A fingerprint
/// that is no longer in flight was already resolved and is left alone.
fn fan_out(state: &mut State, fp: &Fingerprint, result: BatchResult) -> usize {
    state.pending.remove(fp);

    let Some(entry) = state.in_flight.remove(fp) else {
        debug!("{} already resolved; nothing to deliver", fp.short());
        return 0;
    };

    let label = match result {
        BatchResult::Failed(_) => "failed",
        _ => "completed",
    };
    metrics::ITEMS_RESOLVED.with_label_values(&[label]).inc();

    let mut delivered = 0;
    for mut slot in entry.waiters {
        match slot.deliver(result.clone()) {
            Delivery::Delivered => delivered += 1,
            Delivery::ReceiverGone => {
                debug!("Waiter for {} stopped listening", fp.short());
            }
            Delivery::AlreadyFilled => {
                debug!("Waiter for {} already has a result", fp.short());
            }
        }
    }
    delivered
}
