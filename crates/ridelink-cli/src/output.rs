//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde_json::Value;

use ridelink_core::{CachedEntry, FlushReport, PendingAction};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print pending actions in delivery order
    pub fn print_actions(&self, actions: &[PendingAction]) {
        match self.format {
            OutputFormat::Human => {
                if actions.is_empty() {
                    println!("No pending actions.");
                    return;
                }
                for action in actions {
                    println!(
                        "{} | {:<6} {} | {} | retries {}/{} | {}",
                        &action.id.to_string()[..8],
                        action.method.as_str(),
                        truncate(&action.endpoint, 40),
                        truncate(&action.kind, 20),
                        action.retry_count,
                        action.max_retries,
                        action.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("\n{} pending action(s)", actions.len());
            }
            OutputFormat::Json => print_json(&actions),
            OutputFormat::Quiet => {
                for action in actions {
                    println!("{}", action.id);
                }
            }
        }
    }

    /// Print the outcome of a flush cycle
    pub fn print_flush(&self, report: &FlushReport, remaining: usize) {
        match self.format {
            OutputFormat::Human => {
                if report.skipped {
                    println!("Flush already in progress.");
                    return;
                }
                println!(
                    "Attempted {}: {} delivered, {} requeued, {} dropped",
                    report.attempted, report.delivered, report.requeued, report.dropped
                );
                println!("{} action(s) still pending", remaining);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "report": report, "remaining": remaining })
                );
            }
            OutputFormat::Quiet => println!("{}", remaining),
        }
    }

    /// Print a cache entry
    pub fn print_cache_entry(&self, entry: &CachedEntry, value: &Value) {
        match self.format {
            OutputFormat::Human => {
                println!("Key:     {}", entry.key);
                println!("Cached:  {}", entry.cached_at.format("%Y-%m-%d %H:%M:%S"));
                println!("Expires: {}", entry.expires_at.format("%Y-%m-%d %H:%M:%S"));
                println!();
                println!("{}", pretty(value));
            }
            OutputFormat::Json => print_json(entry),
            OutputFormat::Quiet => println!("{}", value),
        }
    }

    /// Print an event received on the live channel
    pub fn print_event(&self, event: &str, payload: &Value) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "[{}] {} {}",
                    chrono::Local::now().format("%H:%M:%S"),
                    event,
                    payload
                );
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "event": event, "payload": payload }));
            }
            OutputFormat::Quiet => println!("{}", event),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("/rides/1234567/cancel", 10), "/rides/...");
        assert_eq!(truncate("fahrt-storniert-äöü", 8), "fahrt...");
    }
}
