//! TTL cache of last-known data for offline reads
//!
//! Entries are stored in the shared [`KeyValueStore`] under the `cache:`
//! prefix. Expiry is checked lazily on read:
//!
//! - before `expires_at` the value is returned
//! - after it, while online, the entry is evicted and `None` returned
//! - after it, while offline, the stale value is returned and kept, since
//!   nothing fresher can be fetched
//!
//! Storage failures are logged and read as a miss.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::network::NetworkObserver;
use crate::storage::{KeyValueStore, StorageError, StorageResult};

/// Key prefix for cache entries
pub const CACHE_PREFIX: &str = "cache:";

pub const PROFILE_KEY: &str = "profile";
pub const RECENT_ACTIVITY_KEY: &str = "recent_activity";
pub const CONTACTS_KEY: &str = "contacts";

/// Longer TTLs are clamped to this
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// A cached value with its freshness window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntry {
    pub key: String,
    pub value: Value,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Per-cache TTLs for [`CacheStore::cache_offline_data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub profile: Duration,
    pub recent_activity: Duration,
    pub contacts: Duration,
}

impl From<&CacheConfig> for CacheTtls {
    fn from(config: &CacheConfig) -> Self {
        Self {
            profile: Duration::from_secs(config.profile_ttl_secs),
            recent_activity: Duration::from_secs(config.recent_activity_ttl_secs),
            contacts: Duration::from_secs(config.contacts_ttl_secs),
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

/// Data to keep available offline; `None` leaves that cache untouched
#[derive(Debug, Clone, Default)]
pub struct OfflineSnapshot {
    pub profile: Option<Value>,
    pub recent_activity: Option<Value>,
    pub contacts: Option<Value>,
}

/// Read-through cache over the shared key-value store
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    network: Arc<dyn NetworkObserver>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        network: Arc<dyn NetworkObserver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            network,
            clock,
        }
    }

    /// Store `value` under `key` for `ttl`
    ///
    /// Returns false if the write could not be persisted.
    pub fn cache_data(&self, key: &str, value: Value, ttl: Duration) -> bool {
        let cached_at = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl.min(MAX_TTL)).unwrap_or(chrono::Duration::zero());
        let expires_at = cached_at + ttl;

        let entry = CachedEntry {
            key: key.to_string(),
            value,
            cached_at,
            expires_at,
        };

        match self.write(&entry) {
            Ok(()) => {
                debug!(key, %expires_at, "cached");
                true
            }
            Err(e) => {
                warn!(key, error = %e, "failed to write cache entry");
                false
            }
        }
    }

    /// Serialize and cache a typed value
    pub fn cache<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.cache_data(key, value, ttl),
            Err(e) => {
                warn!(key, error = %e, "failed to serialize cache value");
                false
            }
        }
    }

    /// Read the cached value for `key`, honoring expiry and connectivity
    pub fn get_cached_data(&self, key: &str) -> Option<Value> {
        let entry = match self.read(key) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key, error = %e, "failed to read cache entry");
                return None;
            }
        };

        if !entry.is_expired(self.clock.now()) {
            return Some(entry.value);
        }

        if self.network.is_connected() {
            debug!(key, "evicting expired cache entry");
            if let Err(e) = self.store.remove(&storage_key(key)) {
                warn!(key, error = %e, "failed to evict cache entry");
            }
            None
        } else {
            debug!(key, "serving stale cache entry while offline");
            Some(entry.value)
        }
    }

    /// Typed variant of [`get_cached_data`](Self::get_cached_data)
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_cached_data(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// The raw entry, without expiry handling
    pub fn entry(&self, key: &str) -> Option<CachedEntry> {
        self.read(key).ok().flatten()
    }

    /// Seed the profile, recent activity and contacts caches in one call
    ///
    /// Returns how many caches were written.
    pub fn cache_offline_data(&self, snapshot: OfflineSnapshot, ttls: &CacheTtls) -> usize {
        let caches = [
            (PROFILE_KEY, snapshot.profile, ttls.profile),
            (
                RECENT_ACTIVITY_KEY,
                snapshot.recent_activity,
                ttls.recent_activity,
            ),
            (CONTACTS_KEY, snapshot.contacts, ttls.contacts),
        ];

        let mut written = 0;
        for (key, value, ttl) in caches {
            if let Some(value) = value {
                if self.cache_data(key, value, ttl) {
                    written += 1;
                }
            }
        }
        written
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.store.remove(&storage_key(key)) {
            warn!(key, error = %e, "failed to remove cache entry");
        }
    }

    /// Cache keys currently stored (without the prefix)
    pub fn keys(&self) -> Vec<String> {
        match self.store.list_keys(CACHE_PREFIX) {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(CACHE_PREFIX).map(str::to_string))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list cache keys");
                Vec::new()
            }
        }
    }

    /// Remove every cache entry; returns how many were removed
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for key in self.keys() {
            match self.store.remove(&storage_key(&key)) {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = key.as_str(), error = %e, "failed to remove cache entry"),
            }
        }
        removed
    }

    fn read(&self, key: &str) -> StorageResult<Option<CachedEntry>> {
        let storage_key = storage_key(key);
        let Some(raw) = self.store.get(&storage_key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::serialization(&storage_key, e))
    }

    fn write(&self, entry: &CachedEntry) -> StorageResult<()> {
        let storage_key = storage_key(&entry.key);
        let raw =
            serde_json::to_string(entry).map_err(|e| StorageError::serialization(&storage_key, e))?;
        self.store.set(&storage_key, &raw)
    }
}

fn storage_key(key: &str) -> String {
    format!("{}{}", CACHE_PREFIX, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::network::ManualNetwork;
    use crate::storage::memory::FailingStore;
    use crate::storage::MemoryStore;
    use serde_json::json;

    struct Fixture {
        cache: CacheStore,
        store: Arc<MemoryStore>,
        network: Arc<ManualNetwork>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let network = Arc::new(ManualNetwork::online());
        let clock = Arc::new(ManualClock::default());
        let cache = CacheStore::new(store.clone(), network.clone(), clock.clone());
        Fixture {
            cache,
            store,
            network,
            clock,
        }
    }

    #[test]
    fn test_fresh_value_returned() {
        let f = fixture();
        assert!(f
            .cache
            .cache_data("profile", json!({"name": "Ada"}), Duration::from_secs(60)));

        f.clock.advance(chrono::Duration::seconds(59));
        assert_eq!(
            f.cache.get_cached_data("profile"),
            Some(json!({"name": "Ada"}))
        );
        assert!(f.store.get("cache:profile").unwrap().is_some());
    }

    #[test]
    fn test_expired_entry_evicted_while_online() {
        let f = fixture();
        f.cache
            .cache_data("rides", json!([1, 2]), Duration::from_secs(60));

        // expires_at itself counts as expired
        f.clock.advance(chrono::Duration::seconds(60));
        assert_eq!(f.cache.get_cached_data("rides"), None);
        assert!(f.store.get("cache:rides").unwrap().is_none());
        assert_eq!(f.cache.get_cached_data("rides"), None);
    }

    #[test]
    fn test_expired_entry_served_stale_while_offline() {
        let f = fixture();
        f.cache
            .cache_data("rides", json!([1, 2]), Duration::from_secs(60));
        f.network.set_online(false);

        f.clock.advance(chrono::Duration::hours(5));
        assert_eq!(f.cache.get_cached_data("rides"), Some(json!([1, 2])));
        assert!(f.store.get("cache:rides").unwrap().is_some());

        // Back online, the stale entry goes
        f.network.set_online(true);
        assert_eq!(f.cache.get_cached_data("rides"), None);
    }

    #[test]
    fn test_entry_invariant_and_overwrite() {
        let f = fixture();
        f.cache.cache_data("k", json!(1), Duration::ZERO);
        let entry = f.cache.entry("k").unwrap();
        assert!(entry.expires_at >= entry.cached_at);

        f.cache.cache_data("k", json!(2), Duration::from_secs(10));
        assert_eq!(f.cache.get_cached_data("k"), Some(json!(2)));
    }

    #[test]
    fn test_corrupt_entry_reads_as_miss() {
        let f = fixture();
        f.store.set("cache:broken", "{not json").unwrap();
        assert_eq!(f.cache.get_cached_data("broken"), None);
    }

    #[test]
    fn test_failing_store_degrades_to_miss() {
        let cache = CacheStore::new(
            Arc::new(FailingStore),
            Arc::new(ManualNetwork::offline()),
            Arc::new(ManualClock::default()),
        );

        assert!(!cache.cache_data("profile", json!({"name": "Ada"}), Duration::from_secs(60)));
        assert_eq!(cache.get_cached_data("profile"), None);
        assert!(cache.entry("profile").is_none());
        assert!(cache.keys().is_empty());
        assert_eq!(cache.clear(), 0);
    }

    #[test]
    fn test_typed_access() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Profile {
            name: String,
            rating: f32,
        }

        let f = fixture();
        let profile = Profile {
            name: "Grace".into(),
            rating: 4.5,
        };
        assert!(f.cache.cache("profile", &profile, Duration::from_secs(5)));
        assert_eq!(f.cache.get::<Profile>("profile"), Some(profile));
        assert_eq!(f.cache.get::<Vec<u32>>("profile"), None);
    }

    #[test]
    fn test_offline_snapshot_uses_independent_ttls() {
        let f = fixture();
        let ttls = CacheTtls {
            profile: Duration::from_secs(300),
            recent_activity: Duration::from_secs(60),
            contacts: Duration::from_secs(120),
        };
        let written = f.cache.cache_offline_data(
            OfflineSnapshot {
                profile: Some(json!({"id": 1})),
                recent_activity: Some(json!([])),
                contacts: None,
            },
            &ttls,
        );
        assert_eq!(written, 2);

        f.clock.advance(chrono::Duration::seconds(90));
        assert!(f.cache.get_cached_data(PROFILE_KEY).is_some());
        assert!(f.cache.get_cached_data(RECENT_ACTIVITY_KEY).is_none());
        assert!(f.cache.get_cached_data(CONTACTS_KEY).is_none());
    }

    #[test]
    fn test_keys_and_clear_leave_other_prefixes() {
        let f = fixture();
        f.store.set("offline_queue:pending", "[]").unwrap();
        f.cache.cache_data("a", json!(1), Duration::from_secs(5));
        f.cache.cache_data("b", json!(2), Duration::from_secs(5));

        assert_eq!(f.cache.keys(), vec!["a".to_string(), "b".to_string()]);
        f.cache.remove("a");
        assert_eq!(f.cache.keys(), vec!["b".to_string()]);

        assert_eq!(f.cache.clear(), 1);
        assert!(f.cache.keys().is_empty());
        assert!(f.store.get("offline_queue:pending").unwrap().is_some());
    }
}
