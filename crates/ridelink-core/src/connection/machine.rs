//! Connection state machine
//!
//! Pure transition logic, no I/O. The driver in `manager` feeds it triggers
//! and carries out the returned effects.
//!
//! ```text
//! Disconnected --connect--> Connecting --opened--> Connected
//!                              |  ^                   |
//!                     open failed  backoff elapsed    unexpected close
//!                              v  |                   |
//!                           Reconnecting <------------+
//!
//! any --disconnect--> Disconnected
//! Connecting/Connected --failure beyond max attempts--> Disconnected (exhausted)
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Live channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Linear backoff with a cap and an attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt).min(self.max_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), 5)
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Caller asked to connect
    ConnectRequested,
    /// Transport confirmed the channel is open
    Opened,
    /// The open attempt failed
    OpenFailed,
    /// An open channel closed without being asked to
    ClosedUnexpectedly,
    /// The backoff delay elapsed
    BackoffElapsed,
    /// No credential is available for the next attempt
    CredentialMissing,
    /// Caller asked to disconnect
    DisconnectRequested,
}

/// What the driver must do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start an open attempt
    Open,
    /// Re-join active rooms on the new channel
    ReplayRooms,
    /// Wait this long, then fire `BackoffElapsed`
    ScheduleRetry(Duration),
    /// Attempt budget spent; stop trying
    GiveUp,
    /// Close the channel and cancel any pending retry
    Close,
}

/// A state change and the effect it requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub effect: Effect,
}

/// The reconnection state machine
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    /// Consecutive failed attempts since the last successful open
    attempts: u32,
    policy: BackoffPolicy,
    /// Stopped by exhausting the attempt budget rather than by the caller
    exhausted: bool,
}

impl ConnectionMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
            exhausted: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Whether the machine gave up on its own (eligible for `resume`)
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Delay for the currently scheduled retry
    pub fn retry_delay(&self) -> Duration {
        self.policy.delay_for(self.attempts)
    }

    /// Apply `trigger`; `None` means it does not apply in the current state
    pub fn handle(&mut self, trigger: Trigger) -> Option<Transition> {
        use ConnectionState::*;

        let from = self.state;
        let (to, effect) = match (from, trigger) {
            (Disconnected, Trigger::ConnectRequested) => {
                self.attempts = 0;
                self.exhausted = false;
                (Connecting, Effect::Open)
            }
            (Connecting, Trigger::Opened) => {
                self.attempts = 0;
                (Connected, Effect::ReplayRooms)
            }
            (Connecting, Trigger::OpenFailed) | (Connected, Trigger::ClosedUnexpectedly) => {
                self.attempts += 1;
                if self.attempts > self.policy.max_attempts {
                    self.exhausted = true;
                    (Disconnected, Effect::GiveUp)
                } else {
                    (Reconnecting, Effect::ScheduleRetry(self.retry_delay()))
                }
            }
            (Reconnecting, Trigger::BackoffElapsed) => (Connecting, Effect::Open),
            (Connecting, Trigger::CredentialMissing) => {
                self.exhausted = false;
                (Disconnected, Effect::Close)
            }
            (Connecting | Connected | Reconnecting, Trigger::DisconnectRequested) => {
                self.attempts = 0;
                self.exhausted = false;
                (Disconnected, Effect::Close)
            }
            _ => return None,
        };

        self.state = to;
        Some(Transition { from, to, effect })
    }
}
