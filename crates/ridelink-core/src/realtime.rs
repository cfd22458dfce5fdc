//! Composition root
//!
//! [`Realtime`] builds the event bus, cache, offline queue and connection
//! manager from a [`Config`] and the platform [`Collaborators`], then wires
//! them together:
//!
//! - network restored: resume an exhausted connection, then flush the queue
//! - every `flush_interval` while online with pending actions: flush
//! - configured inbound events: cache their latest payload under `event:<name>`
//!
//! Background work stops on [`Realtime::shutdown`] or when dropped.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{ConnectError, DeliveryError, HandlerError};
use crate::events::{EventBus, EventSubscription};
use crate::network::{ListenerId, NetworkObserver, NetworkStatus};
use crate::queue::{ActionSubmitter, NewAction, OfflineActionQueue};
use crate::storage::KeyValueStore;
use crate::transport::Transport;

/// Cache key prefix for payloads of cached inbound events
pub const EVENT_CACHE_PREFIX: &str = "event:";

/// Platform services the realtime layer depends on
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn KeyValueStore>,
    pub network: Arc<dyn NetworkObserver>,
    pub submitter: Arc<dyn ActionSubmitter>,
    pub auth: Arc<dyn TokenProvider>,
    pub clock: Arc<dyn Clock>,
}

/// Result of [`Realtime::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The server accepted the request
    Delivered,
    /// Stored for a later flush
    Queued(Uuid),
}

/// The wired-up realtime layer
pub struct Realtime {
    bus: EventBus,
    cache: Arc<CacheStore>,
    queue: Arc<OfflineActionQueue>,
    connection: Arc<ConnectionManager>,
    network: Arc<dyn NetworkObserver>,
    listener: Mutex<Option<ListenerId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<EventSubscription>>,
}

impl Realtime {
    /// Build and start the realtime layer; must be called inside a tokio runtime
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            transport,
            store,
            network,
            submitter,
            auth,
            clock,
        } = collaborators;

        let bus = EventBus::new();
        let cache = Arc::new(CacheStore::new(
            Arc::clone(&store),
            Arc::clone(&network),
            Arc::clone(&clock),
        ));

        let queue = Arc::new(OfflineActionQueue::new(
            &config.queue,
            store,
            submitter,
            Arc::clone(&auth),
            bus.clone(),
            Arc::clone(&clock),
        ));
        match queue.load() {
            Ok(count) if count > 0 => info!("Loaded {} pending action(s)", count),
            Ok(_) => {}
            Err(e) => warn!("Starting with an empty queue, failed to load: {}", e),
        }

        let connection = Arc::new(ConnectionManager::spawn(
            &config.reconnect,
            transport,
            auth,
            bus.clone(),
            clock,
        ));

        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let listener = network.add_listener(Box::new(move |status: NetworkStatus| {
            let _ = status_tx.send(status);
        }));

        let mut tasks = vec![tokio::spawn(watch_network(
            status_rx,
            network.is_connected(),
            Arc::clone(&connection),
            Arc::clone(&queue),
        ))];
        if let Some(interval) = config.queue.flush_interval() {
            tasks.push(tokio::spawn(periodic_flush(
                interval,
                Arc::clone(&network),
                Arc::clone(&queue),
            )));
        }

        let event_ttl = Duration::from_secs(config.cache.event_ttl_secs);
        let subscriptions = config
            .cache
            .cached_events
            .iter()
            .map(|event| {
                let cache = Arc::clone(&cache);
                let key = format!("{}{}", EVENT_CACHE_PREFIX, event);
                bus.on(event, move |data| {
                    if cache.cache_data(&key, data.clone(), event_ttl) {
                        Ok(())
                    } else {
                        Err(HandlerError::new(format!("failed to cache {}", key)))
                    }
                })
            })
            .collect();

        Self {
            bus,
            cache,
            queue,
            connection,
            network,
            listener: Mutex::new(Some(listener)),
            tasks: Mutex::new(tasks),
            subscriptions: Mutex::new(subscriptions),
        }
    }

    /// Open the live channel
    pub fn connect(&self) -> Result<(), ConnectError> {
        self.connection.connect()
    }

    /// Send a mutating request now, or queue it when that is not possible
    ///
    /// Offline requests and requests failing with a transient error are
    /// queued. Other delivery errors are returned; the request is not queued.
    pub async fn submit(&self, action: NewAction) -> Result<SubmitOutcome, DeliveryError> {
        if !self.network.is_connected() {
            debug!(
                reachable = self.network.is_internet_reachable(),
                "Offline, queueing {}", action.endpoint
            );
            let pending = self.queue.queue_action(action);
            return Ok(SubmitOutcome::Queued(pending.id));
        }

        match self.queue.deliver(&action).await {
            Ok(()) => Ok(SubmitOutcome::Delivered),
            Err(e) if e.is_transient() => {
                warn!("Delivery to {} failed ({}), queueing", action.endpoint, e);
                let pending = self.queue.queue_action(action);
                Ok(SubmitOutcome::Queued(pending.id))
            }
            Err(e) => Err(e),
        }
    }

    /// Stop background work and close the live channel
    pub async fn shutdown(&self) {
        self.stop_background();
        self.connection.disconnect().await;
        info!("Realtime layer shut down");
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn queue(&self) -> &OfflineActionQueue {
        &self.queue
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    fn stop_background(&self) {
        if let Some(id) = lock(&self.listener).take() {
            self.network.remove_listener(id);
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        for subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl Drop for Realtime {
    fn drop(&mut self) {
        self.stop_background();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// React to connectivity transitions
async fn watch_network(
    mut statuses: mpsc::UnboundedReceiver<NetworkStatus>,
    mut online: bool,
    connection: Arc<ConnectionManager>,
    queue: Arc<OfflineActionQueue>,
) {
    while let Some(status) = statuses.recv().await {
        let now_online = status.is_online();
        if now_online && !online {
            info!("Network restored");
            connection.resume();
            queue.flush().await;
        } else if !now_online && online {
            info!("Network lost");
        }
        online = now_online;
    }
    debug!("Network watcher stopped");
}

/// Flush on a fixed interval while online with pending actions
async fn periodic_flush(
    interval: Duration,
    network: Arc<dyn NetworkObserver>,
    queue: Arc<OfflineActionQueue>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if network.is_connected() && queue.pending_count() > 0 {
            debug!("Periodic flush");
            queue.flush().await;
        }
    }
}
