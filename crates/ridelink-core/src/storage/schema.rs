//! SQLite schema for the key-value store
//!
//! A single table of string keys to JSON text values. Key prefixes
//! (`cache:`, `offline_queue:`) namespace the components sharing it.

use rusqlite::{params, Connection, OptionalExtension, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Durable key-value entries
        CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Check whether the schema still needs to be created
pub fn needs_init(conn: &Connection) -> Result<bool> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .or_else(|e| match e {
            // schema_info itself is missing on a fresh database
            rusqlite::Error::SqliteFailure(_, _) => Ok(None),
            other => Err(other),
        })?;

    Ok(version.as_deref() != Some(SCHEMA_VERSION.to_string().as_str()))
}
