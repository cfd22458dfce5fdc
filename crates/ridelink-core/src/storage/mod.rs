//! Storage layer
//!
//! A generic durable key-value contract shared by the cache and the offline
//! action queue.
//!
//! ## Implementations
//!
//! - **SqliteStore**: durable, one row per key
//! - **MemoryStore**: in-process, for tests and ephemeral sessions
//!
//! Keys are namespaced by component prefixes so several owners can share a
//! single store without collisions.

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

/// Durable key-value storage
///
/// Values are opaque strings; callers in this crate store JSON.
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if the key is absent
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Insert or overwrite a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a key; removing an absent key is not an error
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// List every key starting with `prefix`, in lexical order
    fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
