//! Cache command handlers

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use ridelink_core::Config;

use super::open_cache;
use crate::output::Output;

/// Print a cached value
pub fn get(config: &Config, key: String, offline: bool, output: &Output) -> Result<()> {
    let cache = open_cache(config, !offline)?;

    // Read the entry first; an online read of an expired entry evicts it
    let entry = cache.entry(&key);
    match (cache.get_cached_data(&key), entry) {
        (Some(value), Some(entry)) => {
            output.print_cache_entry(&entry, &value);
            Ok(())
        }
        (None, Some(_)) => bail!("Cache entry '{}' has expired", key),
        _ => bail!("No cache entry for '{}'", key),
    }
}

/// Cache a JSON value
pub fn set(config: &Config, key: String, value: String, ttl: u64, output: &Output) -> Result<()> {
    let value: Value = serde_json::from_str(&value).context("Value is not valid JSON")?;
    let cache = open_cache(config, true)?;
    if !cache.cache_data(&key, value, Duration::from_secs(ttl)) {
        bail!("Failed to write cache entry '{}'", key);
    }
    output.success(&format!("Cached {} for {}s", key, ttl));
    Ok(())
}

/// Remove every cached entry
pub fn clear(config: &Config, output: &Output) -> Result<()> {
    let cache = open_cache(config, true)?;
    let removed = cache.clear();
    output.success(&format!("Removed {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" }));
    Ok(())
}
