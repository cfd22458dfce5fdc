//! Queue command handlers

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use ridelink_core::{Config, HttpMethod, NewAction};

use super::open_queue;
use crate::output::Output;

/// List pending actions
pub fn list(config: &Config, output: &Output) -> Result<()> {
    let queue = open_queue(config, None)?;
    output.print_actions(&queue.pending());
    Ok(())
}

/// Queue an action for the next flush
pub fn add(
    config: &Config,
    kind: String,
    endpoint: String,
    method: String,
    body: Option<String>,
    output: &Output,
) -> Result<()> {
    let method: HttpMethod = method.parse().map_err(|e: String| anyhow!(e))?;
    let mut action = NewAction::new(kind, endpoint, method);
    if let Some(body) = body {
        let body: Value = serde_json::from_str(&body).context("Body is not valid JSON")?;
        action = action.with_body(body);
    }

    let queue = open_queue(config, None)?;
    let pending = queue.queue_action(action);

    if output.is_quiet() {
        println!("{}", pending.id);
    } else {
        output.success(&format!(
            "Queued {} {} ({} pending)",
            pending.method,
            pending.endpoint,
            queue.pending_count()
        ));
    }
    Ok(())
}

/// Run one flush cycle against the API
pub async fn flush(config: &Config, token: Option<String>, output: &Output) -> Result<()> {
    let queue = open_queue(config, token)?;
    if queue.pending_count() == 0 {
        output.message("Nothing to flush.");
        return Ok(());
    }

    let report = queue.flush().await;
    output.print_flush(&report, queue.pending_count());
    Ok(())
}

/// Drop every pending action
pub fn clear(config: &Config, output: &Output) -> Result<()> {
    let queue = open_queue(config, None)?;
    let removed = queue.clear();
    output.success(&format!("Removed {} pending action(s)", removed));
    Ok(())
}
