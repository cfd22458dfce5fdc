//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use ridelink_core::{Config, WireFormat};

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, server_url, api_url, wire_format, reconnect.max_attempts, \
     reconnect.base_delay_ms, reconnect.max_delay_ms, queue.capacity, queue.max_retries, \
     queue.flush_interval_secs, cache.cached_events";

fn load(config_path: Option<&PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config = load(config_path)?;

    match output.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{}", json),
            Err(e) => bail!("Failed to encode configuration: {}", e),
        },
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:     {}", config.data_dir.display());
            println!(
                "  server_url:   {}",
                config.server_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  api_url:      {}",
                config.api_url.as_deref().unwrap_or("(not set)")
            );
            println!("  wire_format:  {:?}", config.wire_format);
            println!();
            println!("Reconnect:");
            println!("  max_attempts:  {}", config.reconnect.max_attempts);
            println!("  base_delay_ms: {}", config.reconnect.base_delay_ms);
            println!("  max_delay_ms:  {}", config.reconnect.max_delay_ms);
            println!();
            println!("Queue:");
            println!("  capacity:            {}", config.queue.capacity);
            println!("  max_retries:         {}", config.queue.max_retries);
            println!("  flush_interval_secs: {}", config.queue.flush_interval_secs);
            println!();
            println!(
                "Cached events: {}",
                if config.cache.cached_events.is_empty() {
                    "(none)".to_string()
                } else {
                    config.cache.cached_events.join(", ")
                }
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config = load(config_path)?;
    apply_setting(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    match value.parse() {
        Ok(n) => Ok(n),
        Err(_) => bail!("Invalid value for {}: expected a non-negative integer", key),
    }
}

fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "server_url" => config.server_url = optional(value),
        "api_url" => config.api_url = optional(value),
        "wire_format" => {
            config.wire_format = match value.to_ascii_lowercase().as_str() {
                "json" => WireFormat::Json,
                "cbor" => WireFormat::Cbor,
                _ => bail!("Invalid value for wire_format. Use 'json' or 'cbor'."),
            }
        }
        "reconnect.max_attempts" => config.reconnect.max_attempts = number(key, value)?,
        "reconnect.base_delay_ms" => config.reconnect.base_delay_ms = number(key, value)?,
        "reconnect.max_delay_ms" => config.reconnect.max_delay_ms = number(key, value)?,
        "queue.capacity" => config.queue.capacity = number(key, value)?,
        "queue.max_retries" => config.queue.max_retries = number(key, value)?,
        "queue.flush_interval_secs" => config.queue.flush_interval_secs = number(key, value)?,
        "cache.cached_events" => {
            config.cache.cached_events = value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect();
        }
        _ => bail!(
            "Unknown configuration key: '{}'\nValid keys: {}",
            key,
            VALID_KEYS
        ),
    }
    Ok(())
}
