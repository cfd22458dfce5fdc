//! RideLink Core Library
//!
//! This crate provides the client-side realtime layer for RideLink: a live
//! event channel that survives flaky mobile networks, room subscriptions that
//! are replayed after every reconnect, and a durable queue that keeps
//! mutating requests issued offline until the server accepts them.
//!
//! # Architecture
//!
//! - **ConnectionManager**: live channel lifecycle and reconnection with backoff
//! - **OfflineActionQueue**: persisted FIFO of requests, flushed on reconnect
//! - **EventBus**: fan-out of inbound server events to in-process handlers
//! - **CacheStore**: TTL cache of last-known data, served stale while offline
//!
//! [`Realtime`] wires these together from a [`Config`].
//!
//! # Quick Start
//!
//! ```text
//! let realtime = Realtime::new(&config, Collaborators { .. });
//! realtime.connect()?;
//! realtime.connection().join_room("ride:42").await?;
//!
//! let _sub = realtime.bus().on("ride-status", |data| { ...; Ok(()) });
//!
//! match realtime.submit(NewAction::new("cancel-ride", "/rides/42/cancel", HttpMethod::Post)).await? {
//!     SubmitOutcome::Delivered => {}
//!     SubmitOutcome::Queued(id) => println!("queued {}", id),
//! }
//! ```
//!
//! # Modules
//!
//! - `realtime`: composition root (main entry point)
//! - `connection`: state machine and driver for the live channel
//! - `transport`: WebSocket and in-memory channel transports
//! - `rooms`: room subscription registry
//! - `events`: event bus
//! - `queue`: offline action queue and HTTP submission
//! - `cache`: TTL cache
//! - `storage`: key-value persistence (SQLite, memory)
//! - `network`, `auth`, `clock`: platform collaborators
//! - `config`: application configuration

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod network;
pub mod queue;
pub mod realtime;
pub mod rooms;
pub mod storage;
pub mod transport;

pub use auth::{StaticToken, TokenProvider};
pub use cache::{CacheStore, CacheTtls, CachedEntry, OfflineSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, WireFormat};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ConnectError, DeliveryError, HandlerError, TransportError};
pub use events::{EventBus, EventSubscription};
pub use network::{ManualNetwork, NetworkObserver, NetworkStatus};
pub use queue::{FlushReport, HttpMethod, NewAction, OfflineActionQueue, PendingAction};
pub use realtime::{Collaborators, Realtime, SubmitOutcome};
pub use rooms::{RoomSubscription, RoomSubscriptionRegistry};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore, StorageError};
pub use transport::{MemoryTransport, Transport, WebSocketTransport};
