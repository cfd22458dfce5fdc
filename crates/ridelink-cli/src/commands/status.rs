//! Status command handler

use anyhow::Result;

use ridelink_core::Config;

use super::{open_cache, open_queue};
use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let queue = open_queue(config, None)?;
    let cache = open_cache(config, true)?;
    let pending = queue.pending_count();
    let keys = cache.keys();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server_url": config.server_url,
                    "api_url": config.api_url,
                    "wire_format": config.wire_format,
                    "data_dir": config.data_dir,
                    "queue": {
                        "pending": pending,
                        "capacity": config.queue.capacity,
                        "max_retries": config.queue.max_retries
                    },
                    "cache": {
                        "keys": keys
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", pending);
        }
        OutputFormat::Human => {
            println!("RideLink Status");
            println!("===============");
            println!();
            println!("Live channel:");
            println!(
                "  Server: {}",
                config.server_url.as_deref().unwrap_or("(not set)")
            );
            println!("  Format: {:?}", config.wire_format);
            println!(
                "  Reconnect: up to {} attempts, {}ms steps, {}ms cap",
                config.reconnect.max_attempts,
                config.reconnect.base_delay_ms,
                config.reconnect.max_delay_ms
            );
            println!();
            println!("Offline queue:");
            println!(
                "  API:     {}",
                config.api_url.as_deref().unwrap_or("(not set)")
            );
            println!("  Pending: {}/{}", pending, config.queue.capacity);
            println!();
            println!("Cache:");
            println!("  Location: {}", config.sqlite_path().display());
            if keys.is_empty() {
                println!("  Keys:     (none)");
            } else {
                println!("  Keys:     {}", keys.join(", "));
            }
        }
    }

    Ok(())
}
