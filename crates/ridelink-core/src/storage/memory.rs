//! In-memory key-value store

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{KeyValueStore, StorageError, StorageResult};

/// Key-value store backed by a `BTreeMap`
///
/// Contents are lost when the store is dropped. Sharing one instance through
/// an `Arc` simulates a process restart: build new components over the same
/// store and they see what the previous ones persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Store whose every operation fails, for exercising degraded paths
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FailingStore;

#[cfg(test)]
impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Err(StorageError::Poisoned)
    }

    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::Poisoned)
    }

    fn remove(&self, _key: &str) -> StorageResult<()> {
        Err(StorageError::Poisoned)
    }

    fn list_keys(&self, _prefix: &str) -> StorageResult<Vec<String>> {
        Err(StorageError::Poisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.get("a").unwrap().is_none());

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));

        store.remove("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
        store.remove("a").unwrap();
    }

    #[test]
    fn test_list_keys_by_prefix() {
        let store = MemoryStore::new();
        store.set("cache:b", "{}").unwrap();
        store.set("cache:a", "{}").unwrap();
        store.set("offline_queue:pending", "[]").unwrap();
        store.set("cachet", "{}").unwrap();

        assert_eq!(
            store.list_keys("cache:").unwrap(),
            vec!["cache:a".to_string(), "cache:b".to_string()]
        );
        assert_eq!(store.list_keys("").unwrap().len(), 4);
        assert!(store.list_keys("missing:").unwrap().is_empty());
    }
}
