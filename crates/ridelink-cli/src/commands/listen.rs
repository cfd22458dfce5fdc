//! Listen command handler
//!
//! Runs the full realtime layer against the configured live channel and
//! prints lifecycle events plus any inbound events asked for with `--event`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use ridelink_core::events::{
    ACTION_DROPPED, CONNECTION_FAILED, CONNECTION_STATE_CHANGED, QUEUE_FLUSHED,
};
use ridelink_core::queue::HttpSubmitter;
use ridelink_core::{
    Collaborators, Config, EventSubscription, ManualNetwork, Realtime, SystemClock,
    WebSocketTransport,
};

use super::{open_store, token_provider};
use crate::output::Output;
use crate::probe::{self, ProbeTarget};

/// How often reachability of the live channel host is checked
const PROBE_INTERVAL: Duration = Duration::from_secs(10);

const LIFECYCLE_EVENTS: [&str; 4] = [
    CONNECTION_STATE_CHANGED,
    CONNECTION_FAILED,
    QUEUE_FLUSHED,
    ACTION_DROPPED,
];

pub async fn run(
    config: &Config,
    rooms: Vec<String>,
    events: Vec<String>,
    token: Option<String>,
    output: &Output,
) -> Result<()> {
    let server_url = config.server_url.as_deref().ok_or_else(|| {
        anyhow!("No server_url configured. Run: ridelink config set server_url <ws-url>")
    })?;

    let transport = WebSocketTransport::new(server_url, config.wire_format)
        .with_connect_timeout(config.reconnect.connect_timeout());
    let url = transport.url().to_string();
    let submitter = HttpSubmitter::new(config.api_url.as_deref(), config.queue.request_timeout())?;

    // Assume reachable until the first probe says otherwise
    let network = Arc::new(ManualNetwork::online());
    let target = ProbeTarget::from_url(server_url)?;
    let prober = probe::spawn(target, network.clone(), PROBE_INTERVAL);

    let realtime = Realtime::new(
        config,
        Collaborators {
            transport: Arc::new(transport),
            store: open_store(config)?,
            network,
            submitter: Arc::new(submitter),
            auth: token_provider(token),
            clock: Arc::new(SystemClock),
        },
    );

    let output = *output;
    let mut names: Vec<&str> = LIFECYCLE_EVENTS.to_vec();
    names.extend(events.iter().map(String::as_str));
    let subscriptions: Vec<EventSubscription> = names
        .into_iter()
        .map(|event| {
            let name = event.to_string();
            realtime.bus().on(event, move |payload| {
                output.print_event(&name, payload);
                Ok(())
            })
        })
        .collect();

    realtime
        .connect()
        .context("Cannot connect. Pass --token or set RIDELINK_TOKEN")?;
    for room in &rooms {
        realtime.connection().join_room(room).await?;
    }
    info!("Listening on {} ({} rooms)", url, rooms.len());
    output.message("Listening. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    realtime.shutdown().await;
    prober.abort();
    output.message("Disconnected.");
    Ok(())
}
