//! Durable offline action queue
//!
//! Mutating requests issued while offline are appended to a FIFO queue that
//! is persisted to the shared [`KeyValueStore`] after every change, so a
//! queued action survives a restart. [`OfflineActionQueue::flush`] delivers
//! them in order through an [`ActionSubmitter`].
//!
//! ## Retry policy
//!
//! A failed delivery keeps the action in place with `retry_count + 1` while
//! `retry_count < max_retries`. Once the budget is spent the next failure
//! drops it and emits [`ACTION_DROPPED`]. Delivery is at-least-once.
//!
//! ## Flush cycles
//!
//! A cycle attempts exactly the actions present when it started; actions
//! queued meanwhile wait for the next cycle. Only one cycle runs at a time,
//! a concurrent trigger returns a skipped report.

pub mod action;
pub mod submitter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::DeliveryError;
use crate::events::{EventBus, ACTION_DROPPED, QUEUE_FLUSHED};
use crate::storage::{KeyValueStore, StorageError, StorageResult};

pub use action::{HttpMethod, NewAction, PendingAction};
pub use submitter::{ActionSubmitter, HttpSubmitter, ScriptedSubmitter, SubmitRequest};

/// Storage key holding the serialized queue
pub const QUEUE_KEY: &str = "offline_queue:pending";

/// Outcome of one flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Actions submitted in this cycle
    pub attempted: usize,
    pub delivered: usize,
    /// Failed but kept for the next cycle
    pub requeued: usize,
    /// Failed with no retries left
    pub dropped: usize,
    /// Another cycle was already running; nothing was attempted
    pub skipped: bool,
}

impl FlushReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

enum Failure {
    Requeued(u32),
    Dropped(PendingAction),
    /// Removed while its request was in flight
    Gone,
}

/// Releases the flush flag when a cycle ends
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// FIFO of pending mutating requests
pub struct OfflineActionQueue {
    store: Arc<dyn KeyValueStore>,
    submitter: Arc<dyn ActionSubmitter>,
    auth: Arc<dyn TokenProvider>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    actions: Mutex<Vec<PendingAction>>,
    capacity: usize,
    max_retries: u32,
    flushing: AtomicBool,
}

impl OfflineActionQueue {
    /// Create an empty queue; call [`load`](Self::load) to restore persisted actions
    pub fn new(
        config: &QueueConfig,
        store: Arc<dyn KeyValueStore>,
        submitter: Arc<dyn ActionSubmitter>,
        auth: Arc<dyn TokenProvider>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            submitter,
            auth,
            bus,
            clock,
            actions: Mutex::new(Vec::new()),
            capacity: config.capacity.max(1),
            max_retries: config.max_retries,
            flushing: AtomicBool::new(false),
        }
    }

    /// Replace the in-memory queue with the persisted one
    ///
    /// Returns the number of actions restored.
    pub fn load(&self) -> StorageResult<usize> {
        let restored: Vec<PendingAction> = match self.store.get(QUEUE_KEY)? {
            Some(json) => {
                serde_json::from_str(&json).map_err(|e| StorageError::serialization(QUEUE_KEY, e))?
            }
            None => Vec::new(),
        };

        let mut actions = self.lock();
        *actions = restored;
        let trimmed = self.trim(&mut actions);
        let count = actions.len();
        drop(actions);

        if trimmed > 0 {
            self.persist();
        }
        debug!("Restored {} pending action(s)", count);
        Ok(count)
    }

    /// Append an action and persist the queue
    ///
    /// Drops the oldest actions once the queue exceeds its capacity.
    pub fn queue_action(&self, action: NewAction) -> PendingAction {
        let pending = PendingAction::from_new(action, self.max_retries, self.clock.now());

        let mut actions = self.lock();
        actions.push(pending.clone());
        self.trim(&mut actions);
        drop(actions);

        self.persist();
        info!("Queued {} {} ({})", pending.method, pending.endpoint, pending.kind);
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of the queue in delivery order
    pub fn pending(&self) -> Vec<PendingAction> {
        self.lock().clone()
    }

    /// Remove every pending action; returns how many were removed
    pub fn clear(&self) -> usize {
        let removed = std::mem::take(&mut *self.lock()).len();
        self.persist();
        removed
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Submit one request right away, bypassing the queue
    pub async fn deliver(&self, action: &NewAction) -> Result<(), DeliveryError> {
        let request = SubmitRequest::for_new(action, self.auth.access_token());
        self.submitter.submit(&request).await
    }

    /// Run one delivery cycle over the actions present now
    pub async fn flush(&self) -> FlushReport {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already in progress");
            return FlushReport::skipped();
        }
        let _guard = FlushGuard(&self.flushing);

        let batch: Vec<Uuid> = self.lock().iter().map(|a| a.id).collect();
        let mut report = FlushReport::default();

        for id in batch {
            let Some(action) = self.find(id) else {
                continue;
            };
            report.attempted += 1;

            let request = SubmitRequest::for_pending(&action, self.auth.access_token());
            match self.submitter.submit(&request).await {
                Ok(()) => {
                    self.remove(id);
                    report.delivered += 1;
                    debug!("Delivered {} {}", action.method, action.endpoint);
                }
                Err(e) => match self.record_failure(id) {
                    Failure::Requeued(retry_count) => {
                        report.requeued += 1;
                        debug!(
                            "Delivery of {} failed ({}), retry {}/{}",
                            action.endpoint, e, retry_count, action.max_retries
                        );
                    }
                    Failure::Dropped(dropped) => {
                        report.dropped += 1;
                        warn!(
                            "Dropping {} {} after {} retries: {}",
                            dropped.method, dropped.endpoint, dropped.retry_count, e
                        );
                        self.bus.emit(
                            ACTION_DROPPED,
                            &json!({ "action": dropped, "error": e.to_string() }),
                        );
                    }
                    Failure::Gone => {}
                },
            }
            self.persist();
        }

        if report.attempted > 0 {
            info!(
                "Flush: {} delivered, {} requeued, {} dropped",
                report.delivered, report.requeued, report.dropped
            );
        }
        self.bus.emit(QUEUE_FLUSHED, &json!(report));
        report
    }

    fn find(&self, id: Uuid) -> Option<PendingAction> {
        self.lock().iter().find(|a| a.id == id).cloned()
    }

    fn remove(&self, id: Uuid) {
        self.lock().retain(|a| a.id != id);
    }

    fn record_failure(&self, id: Uuid) -> Failure {
        let mut actions = self.lock();
        let Some(index) = actions.iter().position(|a| a.id == id) else {
            return Failure::Gone;
        };
        if actions[index].has_retries_left() {
            actions[index].retry_count += 1;
            Failure::Requeued(actions[index].retry_count)
        } else {
            Failure::Dropped(actions.remove(index))
        }
    }

    /// Drop the oldest actions beyond capacity; returns how many were dropped
    fn trim(&self, actions: &mut Vec<PendingAction>) -> usize {
        let excess = actions.len().saturating_sub(self.capacity);
        for dropped in actions.drain(..excess) {
            warn!(
                "Queue full, dropping oldest action {} {} ({})",
                dropped.method, dropped.endpoint, dropped.id
            );
        }
        excess
    }

    /// Best effort: a failed write is logged and the in-memory queue kept
    fn persist(&self) {
        let actions = self.lock();
        let result = serde_json::to_string(&*actions)
            .map_err(|e| StorageError::serialization(QUEUE_KEY, e))
            .and_then(|json| self.store.set(QUEUE_KEY, &json));
        if let Err(e) = result {
            warn!("Failed to persist offline queue: {}", e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingAction>> {
        self.actions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for OfflineActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineActionQueue")
            .field("pending", &self.pending_count())
            .field("capacity", &self.capacity)
            .field("flushing", &self.is_flushing())
            .finish()
    }
}
