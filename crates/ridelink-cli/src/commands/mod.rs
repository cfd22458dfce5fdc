//! Command handlers

pub mod cache;
pub mod config;
pub mod listen;
pub mod queue;
pub mod status;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use ridelink_core::queue::HttpSubmitter;
use ridelink_core::{
    CacheStore, Config, EventBus, ManualNetwork, OfflineActionQueue, SqliteStore, StaticToken,
    SystemClock,
};

/// Environment variable holding the access token
pub const TOKEN_ENV: &str = "RIDELINK_TOKEN";

/// Open the local key-value store
pub fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    match SqliteStore::open(config) {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) if e.is_recoverable() => Err(anyhow!(e)),
        Err(e) => Err(e).with_context(|| format!("Failed to open store at {:?}", config.sqlite_path())),
    }
}

/// Token from the flag, falling back to RIDELINK_TOKEN
pub fn token_provider(token: Option<String>) -> Arc<StaticToken> {
    let token = token
        .or_else(|| std::env::var(TOKEN_ENV).ok())
        .filter(|t| !t.is_empty());
    Arc::new(token.map(StaticToken::new).unwrap_or_default())
}

/// Open the persisted offline queue
pub fn open_queue(config: &Config, token: Option<String>) -> Result<OfflineActionQueue> {
    let store = open_store(config)?;
    let submitter = HttpSubmitter::new(config.api_url.as_deref(), config.queue.request_timeout())?;
    let queue = OfflineActionQueue::new(
        &config.queue,
        store,
        Arc::new(submitter),
        token_provider(token),
        EventBus::new(),
        Arc::new(SystemClock),
    );
    queue.load().context("Failed to load offline queue")?;
    Ok(queue)
}

/// Open the cache; `online` decides whether expired entries are evicted
pub fn open_cache(config: &Config, online: bool) -> Result<CacheStore> {
    let network = if online {
        ManualNetwork::online()
    } else {
        ManualNetwork::offline()
    };
    Ok(CacheStore::new(
        open_store(config)?,
        Arc::new(network),
        Arc::new(SystemClock),
    ))
}
