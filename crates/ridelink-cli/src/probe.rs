//! TCP reachability probe
//!
//! The CLI has no platform connectivity API, so it infers connectivity by
//! periodically opening a TCP connection to the live channel host and pushes
//! the result into a [`ManualNetwork`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use ridelink_core::ManualNetwork;

/// Time allowed for one probe connection
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Host and port to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    /// Derive the target from a ws://, wss://, http:// or https:// URL
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("URL has no host: {}", url))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| anyhow!("URL has no port and no known default: {}", url))?;
        Ok(Self { host, port })
    }
}

/// Whether a TCP connection to the target succeeds in time
pub async fn probe_once(target: &ProbeTarget) -> bool {
    let connect = TcpStream::connect((target.host.as_str(), target.port));
    matches!(tokio::time::timeout(PROBE_TIMEOUT, connect).await, Ok(Ok(_)))
}

/// Probe on an interval, updating `network` with each result
pub fn spawn(target: ProbeTarget, network: Arc<ManualNetwork>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let reachable = probe_once(&target).await;
            debug!("Probe {}:{} reachable={}", target.host, target.port, reachable);
            network.set_online(reachable);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_target_from_url() {
        assert_eq!(
            ProbeTarget::from_url("wss://live.example.com/socket").unwrap(),
            ProbeTarget {
                host: "live.example.com".into(),
                port: 443
            }
        );
        assert_eq!(
            ProbeTarget::from_url("ws://10.0.0.5:4000/ws").unwrap().port,
            4000
        );
        assert!(ProbeTarget::from_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_probe_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = ProbeTarget {
            host: "127.0.0.1".into(),
            port,
        };

        assert!(probe_once(&target).await);

        drop(listener);
        assert!(!probe_once(&target).await);
    }
}
