//! Connection manager
//!
//! [`ConnectionManager`] is a handle to a spawned driver task that owns the
//! live channel. The handle sends commands; the driver runs the
//! [`ConnectionMachine`], opens channels through the [`Transport`], waits out
//! backoff delays and publishes inbound events on the [`EventBus`].
//!
//! Room membership is mutated only by the driver so that a join issued while
//! a channel is opening is either replayed or sent, never both.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::machine::{ConnectionMachine, ConnectionState, Effect, Transition, Trigger};
use crate::auth::TokenProvider;
use crate::clock::Clock;
use crate::config::ReconnectConfig;
use crate::error::{ConnectError, TransportError};
use crate::events::{EventBus, CONNECTION_FAILED, CONNECTION_STATE_CHANGED};
use crate::rooms::RoomSubscriptionRegistry;
use crate::transport::{Channel, Envelope, Inbound, Transport};

/// Commands sent to the driver task
#[derive(Debug)]
enum Command {
    Connect,
    Resume,
    Disconnect(oneshot::Sender<()>),
    JoinRoom(String, oneshot::Sender<bool>),
    LeaveRoom(String, oneshot::Sender<bool>),
    Emit(Envelope, oneshot::Sender<Result<(), TransportError>>),
}

/// Handle to the live channel driver
///
/// Dropping the handle stops the driver and closes any open channel.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    rooms: Arc<Mutex<RoomSubscriptionRegistry>>,
    auth: Arc<dyn TokenProvider>,
}

impl ConnectionManager {
    /// Spawn the driver task; must be called inside a tokio runtime
    pub fn spawn(
        config: &ReconnectConfig,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn TokenProvider>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let rooms = Arc::new(Mutex::new(RoomSubscriptionRegistry::new()));

        let driver = Driver {
            machine: ConnectionMachine::new(config.backoff()),
            connect_timeout: config.connect_timeout(),
            transport,
            auth: Arc::clone(&auth),
            bus,
            clock,
            rooms: Arc::clone(&rooms),
            state_tx,
            commands: command_rx,
            channel: None,
            last_error: None,
        };
        tokio::spawn(driver.run());

        Self {
            commands,
            state_rx,
            rooms,
            auth,
        }
    }

    /// Start connecting
    ///
    /// Fails fast without any attempt when no access token is available.
    /// Ignored unless the channel is disconnected.
    pub fn connect(&self) -> Result<(), ConnectError> {
        if self.auth.access_token().is_none() {
            return Err(ConnectError::MissingCredential);
        }
        self.send(Command::Connect)
    }

    /// Close the channel and stop reconnecting
    pub async fn disconnect(&self) {
        let (ack, done) = oneshot::channel();
        if self.send(Command::Disconnect(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Reconnect if the last cycle gave up after exhausting its attempts
    ///
    /// Does nothing after an intentional disconnect or while connected.
    pub fn resume(&self) {
        if self.send(Command::Resume).is_err() {
            debug!("Resume ignored, connection driver stopped");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Join a room; returns false if it was already active
    ///
    /// The join request goes to the server only while connected; otherwise
    /// it is sent by the replay after the next successful connect.
    pub async fn join_room(&self, room_id: &str) -> Result<bool, ConnectError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::JoinRoom(room_id.to_string(), ack))?;
        done.await.map_err(|_| ConnectError::Stopped)
    }

    /// Leave a room; returns false if it was not active
    pub async fn leave_room(&self, room_id: &str) -> Result<bool, ConnectError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::LeaveRoom(room_id.to_string(), ack))?;
        done.await.map_err(|_| ConnectError::Stopped)
    }

    /// Send a named event over the open channel
    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Emit(Envelope::new(event, payload), ack))
            .map_err(|_| TransportError::NotConnected)?;
        done.await.unwrap_or(Err(TransportError::NotConnected))
    }

    /// Rooms that will be replayed on the next connect, in join order
    pub fn active_rooms(&self) -> Vec<String> {
        lock_rooms(&self.rooms).active_rooms()
    }

    fn send(&self, command: Command) -> Result<(), ConnectError> {
        self.commands.send(command).map_err(|_| ConnectError::Stopped)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("active_rooms", &self.active_rooms())
            .finish()
    }
}

fn lock_rooms(rooms: &Mutex<RoomSubscriptionRegistry>) -> MutexGuard<'_, RoomSubscriptionRegistry> {
    rooms.lock().unwrap_or_else(|e| e.into_inner())
}

/// What woke the driver
enum Wake {
    Opened(Result<Channel, TransportError>),
    Inbound(Option<Inbound>),
    BackoffElapsed,
    Command(Option<Command>),
}

enum Step {
    Continue,
    Stop,
}

struct Driver {
    machine: ConnectionMachine,
    connect_timeout: Duration,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn TokenProvider>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    rooms: Arc<Mutex<RoomSubscriptionRegistry>>,
    state_tx: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    channel: Option<Channel>,
    last_error: Option<String>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let step = match self.machine.state() {
                ConnectionState::Disconnected => self.idle().await,
                ConnectionState::Connecting => self.open().await,
                ConnectionState::Connected => self.serve().await,
                ConnectionState::Reconnecting => self.back_off().await,
            };
            if let Step::Stop = step {
                break;
            }
        }
        debug!("Connection driver stopped");
    }

    async fn idle(&mut self) -> Step {
        match self.commands.recv().await {
            Some(command) => {
                self.command(command);
                Step::Continue
            }
            None => Step::Stop,
        }
    }

    /// Run one open attempt, racing it against commands
    async fn open(&mut self) -> Step {
        let Some(token) = self.auth.access_token() else {
            warn!("No access token for connection attempt, giving up");
            self.apply(Trigger::CredentialMissing);
            return Step::Continue;
        };

        let transport = Arc::clone(&self.transport);
        let limit = self.connect_timeout;
        let attempt = async move {
            match tokio::time::timeout(limit, transport.open(&token)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    url: "live channel".to_string(),
                    secs: limit.as_secs(),
                }),
            }
        };
        tokio::pin!(attempt);

        loop {
            let wake = tokio::select! {
                result = &mut attempt => Wake::Opened(result),
                command = self.commands.recv() => Wake::Command(command),
            };

            match wake {
                Wake::Opened(Ok(channel)) => {
                    self.channel = Some(channel);
                    self.apply(Trigger::Opened);
                    return Step::Continue;
                }
                Wake::Opened(Err(e)) => {
                    warn!("Connection attempt {} failed: {}", self.machine.attempts() + 1, e);
                    self.last_error = Some(e.to_string());
                    self.apply(Trigger::OpenFailed);
                    return Step::Continue;
                }
                Wake::Command(Some(command)) => {
                    self.command(command);
                    // A disconnect abandons the in-flight attempt
                    if self.machine.state() != ConnectionState::Connecting {
                        return Step::Continue;
                    }
                }
                Wake::Command(None) => return Step::Stop,
                Wake::Inbound(_) | Wake::BackoffElapsed => {}
            }
        }
    }

    /// Serve the open channel until the next inbound item or command
    async fn serve(&mut self) -> Step {
        let Some(channel) = self.channel.as_mut() else {
            self.apply(Trigger::ClosedUnexpectedly);
            return Step::Continue;
        };

        let wake = tokio::select! {
            inbound = channel.recv() => Wake::Inbound(inbound),
            command = self.commands.recv() => Wake::Command(command),
        };

        match wake {
            Wake::Inbound(Some(Inbound::Event(envelope))) => {
                debug!("Inbound event {}", envelope.event);
                self.bus.emit(&envelope.event, &envelope.payload);
            }
            Wake::Inbound(Some(Inbound::Closed(reason))) => {
                self.lost(reason.to_string());
            }
            Wake::Inbound(None) => {
                self.lost("transport task gone".to_string());
            }
            Wake::Command(Some(command)) => self.command(command),
            Wake::Command(None) => return Step::Stop,
            Wake::Opened(_) | Wake::BackoffElapsed => {}
        }
        Step::Continue
    }

    /// Wait out the backoff delay unless a command ends the cycle first
    async fn back_off(&mut self) -> Step {
        let delay = self.machine.retry_delay();
        debug!("Reconnecting in {:?}", delay);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            let wake = tokio::select! {
                _ = &mut sleep => Wake::BackoffElapsed,
                command = self.commands.recv() => Wake::Command(command),
            };

            match wake {
                Wake::BackoffElapsed => {
                    self.apply(Trigger::BackoffElapsed);
                    return Step::Continue;
                }
                Wake::Command(Some(command)) => {
                    self.command(command);
                    if self.machine.state() != ConnectionState::Reconnecting {
                        return Step::Continue;
                    }
                }
                Wake::Command(None) => return Step::Stop,
                Wake::Opened(_) | Wake::Inbound(_) => {}
            }
        }
    }

    fn lost(&mut self, reason: String) {
        warn!("Connection lost: {}", reason);
        self.channel = None;
        self.last_error = Some(reason);
        self.apply(Trigger::ClosedUnexpectedly);
    }

    fn command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                self.apply(Trigger::ConnectRequested);
            }
            Command::Resume => {
                if self.machine.state() == ConnectionState::Disconnected
                    && self.machine.is_exhausted()
                {
                    info!("Resuming connection");
                    self.apply(Trigger::ConnectRequested);
                }
            }
            Command::Disconnect(ack) => {
                self.apply(Trigger::DisconnectRequested);
                let _ = ack.send(());
            }
            Command::JoinRoom(room_id, ack) => {
                let joined = {
                    let mut registry = lock_rooms(&self.rooms);
                    let joined = registry.join(&room_id, self.clock.now());
                    if !joined {
                        if let Some(room) = registry.get(&room_id) {
                            debug!("Already in {} since {}", room_id, room.joined_at);
                        }
                    }
                    joined
                };
                if joined {
                    self.send_if_connected(Envelope::join_room(&room_id));
                }
                let _ = ack.send(joined);
            }
            Command::LeaveRoom(room_id, ack) => {
                let left = lock_rooms(&self.rooms).leave(&room_id);
                if left {
                    self.send_if_connected(Envelope::leave_room(&room_id));
                }
                let _ = ack.send(left);
            }
            Command::Emit(envelope, ack) => {
                let result = match (&self.channel, self.machine.state()) {
                    (Some(channel), ConnectionState::Connected) => channel.send(envelope),
                    _ => Err(TransportError::NotConnected),
                };
                let _ = ack.send(result);
            }
        }
    }

    fn send_if_connected(&self, envelope: Envelope) {
        if self.machine.state() != ConnectionState::Connected {
            return;
        }
        if let Some(channel) = &self.channel {
            let event = envelope.event.clone();
            if let Err(e) = channel.send(envelope) {
                warn!("Failed to send {}: {}", event, e);
            }
        }
    }

    /// Feed the machine and carry out the effect
    fn apply(&mut self, trigger: Trigger) -> Option<Transition> {
        let transition = self.machine.handle(trigger)?;

        match transition.effect {
            Effect::Close => {
                if let Some(channel) = self.channel.take() {
                    channel.close();
                }
            }
            Effect::ReplayRooms => self.replay_rooms(),
            Effect::Open | Effect::ScheduleRetry(_) | Effect::GiveUp => {}
        }

        self.publish(&transition);

        if transition.effect == Effect::GiveUp {
            let attempts = self.machine.policy().max_attempts();
            let reason = self.last_error.take().unwrap_or_default();
            warn!("Giving up after {} reconnect attempts: {}", attempts, reason);
            self.bus.emit(
                CONNECTION_FAILED,
                &json!({ "attempts": attempts, "reason": reason }),
            );
        }
        Some(transition)
    }

    fn replay_rooms(&mut self) {
        let (rooms, replays) = {
            let mut registry = lock_rooms(&self.rooms);
            let rooms = registry.replay_all();
            (rooms, registry.replay_count())
        };
        if !rooms.is_empty() {
            info!("Rejoining {} room(s), replay {}", rooms.len(), replays);
        }
        if let Some(channel) = &self.channel {
            for room_id in rooms {
                if let Err(e) = channel.send(Envelope::join_room(&room_id)) {
                    warn!("Failed to rejoin {}: {}", room_id, e);
                }
            }
        }
    }

    fn publish(&self, transition: &Transition) {
        info!("Connection {} -> {}", transition.from, transition.to);
        self.state_tx.send_replace(transition.to);
        self.bus.emit(
            CONNECTION_STATE_CHANGED,
            &json!({
                "state": transition.to,
                "previous": transition.from,
                "attempt": self.machine.attempts(),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::clock::ManualClock;
    use crate::transport::{MemoryTransport, JOIN_ROOM, LEAVE_ROOM};

    struct Harness {
        manager: ConnectionManager,
        transport: MemoryTransport,
        token: Arc<StaticToken>,
        bus: EventBus,
        states: Arc<Mutex<Vec<String>>>,
    }

    fn reconnect_config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            max_attempts,
            connect_timeout_secs: 10,
        }
    }

    fn harness(max_attempts: u32) -> Harness {
        let transport = MemoryTransport::new();
        let token = Arc::new(StaticToken::new("token-1"));
        let bus = EventBus::new();
        let states = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&states);
        let _sub = bus.on(CONNECTION_STATE_CHANGED, move |data| {
            let state = data["state"].as_str().unwrap_or_default().to_string();
            recorded.lock().unwrap().push(state);
            Ok(())
        });

        let manager = ConnectionManager::spawn(
            &reconnect_config(max_attempts),
            Arc::new(transport.clone()),
            token.clone(),
            bus.clone(),
            Arc::new(ManualClock::default()),
        );

        Harness {
            manager,
            transport,
            token,
            bus,
            states,
        }
    }

    /// Transport whose open handshake takes `delay`
    struct SlowOpen {
        inner: MemoryTransport,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Transport for SlowOpen {
        async fn open(&self, token: &str) -> Result<Channel, TransportError> {
            tokio::time::sleep(self.delay).await;
            self.inner.open(token).await
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn joined_rooms(transport: &MemoryTransport) -> Vec<String> {
        transport
            .sent_events(JOIN_ROOM)
            .iter()
            .filter_map(|e| e.room_id().map(str::to_string))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_token_fails_fast() {
        let h = harness(5);
        h.token.clear();

        assert_eq!(h.manager.connect(), Err(ConnectError::MissingCredential));
        settle().await;

        assert_eq!(h.transport.open_count(), 0);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(h.states.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_disconnect() {
        let h = harness(5);
        h.manager.connect().unwrap();
        settle().await;

        assert!(h.manager.is_connected());
        assert_eq!(h.transport.tokens(), vec!["token-1".to_string()]);

        h.manager.disconnect().await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(!h.transport.is_open());

        // Intentional disconnect never reconnects
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(
            *h.states.lock().unwrap(),
            vec!["connecting", "connected", "disconnected"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rooms_changed_during_open_and_disconnect_aborts_open() {
        let transport = MemoryTransport::new();
        let manager = ConnectionManager::spawn(
            &reconnect_config(5),
            Arc::new(SlowOpen {
                inner: transport.clone(),
                delay: Duration::from_secs(2),
            }),
            Arc::new(StaticToken::new("token-1")),
            EventBus::new(),
            Arc::new(ManualClock::default()),
        );

        manager.connect().unwrap();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connecting);

        assert!(manager.join_room("a").await.unwrap());
        assert!(manager.join_room("b").await.unwrap());
        assert!(manager.leave_room("a").await.unwrap());
        assert!(transport.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(manager.is_connected());
        assert_eq!(joined_rooms(&transport), vec!["b"]);
        assert!(transport.sent_events(LEAVE_ROOM).is_empty());

        // Backoff of 1s, then an open that is still in flight
        transport.drop_connection();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 1);
        assert!(!transport.is_open());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_join_sends_one_subscription() {
        let h = harness(5);
        h.manager.connect().unwrap();
        settle().await;

        assert!(h.manager.join_room("ride:1").await.unwrap());
        assert!(!h.manager.join_room("ride:1").await.unwrap());

        assert_eq!(joined_rooms(&h.transport), vec!["ride:1"]);
        assert_eq!(h.manager.active_rooms(), vec!["ride:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_before_connect_is_replayed_once() {
        let h = harness(5);
        assert!(h.manager.join_room("ride:1").await.unwrap());
        assert!(h.transport.sent().is_empty());

        h.manager.connect().unwrap();
        settle().await;

        assert_eq!(joined_rooms(&h.transport), vec!["ride:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replays_rooms_minus_left_during_outage() {
        let h = harness(5);
        h.manager.connect().unwrap();
        settle().await;
        for room in ["ride:1", "chat:2", "pkg:3"] {
            h.manager.join_room(room).await.unwrap();
        }
        h.transport.clear_sent();

        h.transport.refuse_connections(true);
        h.transport.drop_connection();
        settle().await;
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting);

        // Leaving while offline sends nothing
        assert!(h.manager.leave_room("chat:2").await.unwrap());
        assert!(h.transport.sent_events(LEAVE_ROOM).is_empty());

        h.transport.refuse_connections(false);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(h.manager.is_connected());
        assert_eq!(joined_rooms(&h.transport), vec!["ride:1", "pkg:3"]);
        assert_eq!(h.manager.active_rooms(), vec!["ride:1", "pkg:3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_while_connected_sends_request() {
        let h = harness(5);
        h.manager.connect().unwrap();
        settle().await;
        h.manager.join_room("ride:1").await.unwrap();

        assert!(h.manager.leave_room("ride:1").await.unwrap());
        assert!(!h.manager.leave_room("ride:1").await.unwrap());

        let leaves = h.transport.sent_events(LEAVE_ROOM);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].room_id(), Some("ride:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_and_exhaustion() {
        let h = harness(5);
        let failures = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&failures);
        let _sub = h.bus.on(CONNECTION_FAILED, move |data| {
            seen.lock().unwrap().push(data.clone());
            Ok(())
        });

        h.transport.refuse_connections(true);
        h.manager.connect().unwrap();

        // Attempts at t = 0, 1, 3, 6, 10, 15 seconds
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.transport.open_count(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.transport.open_count(), 2);
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(h.transport.open_count(), 4);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.open_count(), 6);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["attempts"], 5);

        // Terminal: no further attempts
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.transport.open_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_backoff_timer() {
        let h = harness(5);
        h.transport.fail_next(1);
        h.manager.connect().unwrap();
        settle().await;
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting);

        h.manager.disconnect().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_only_after_exhaustion() {
        let h = harness(1);
        h.transport.refuse_connections(true);
        h.manager.connect().unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.transport.open_count(), 2);

        h.transport.refuse_connections(false);
        h.manager.resume();
        settle().await;
        assert!(h.manager.is_connected());

        h.manager.disconnect().await;
        h.manager.resume();
        settle().await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.transport.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token_during_reconnect_stops() {
        let h = harness(5);
        h.manager.connect().unwrap();
        settle().await;

        h.token.clear();
        h.transport.drop_connection();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_events_published_in_order() {
        let h = harness(5);
        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&received);
        let _sub = h.bus.on("driver-location", move |data| {
            seen.lock().unwrap().push(data["seq"].as_u64().unwrap_or_default());
            Ok(())
        });

        h.manager.connect().unwrap();
        settle().await;
        for seq in 1..=5 {
            assert!(h.transport.push("driver-location", json!({ "seq": seq })));
        }
        settle().await;

        assert_eq!(*received.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_requires_connection() {
        let h = harness(5);
        assert_eq!(
            h.manager.emit("typing", json!({})).await,
            Err(TransportError::NotConnected)
        );

        h.manager.connect().unwrap();
        settle().await;
        h.manager.emit("typing", json!({ "chat": 7 })).await.unwrap();

        let sent = h.transport.sent_events("typing");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, json!({ "chat": 7 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_change_payload() {
        let h = harness(5);
        let payloads = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&payloads);
        let _sub = h.bus.on(CONNECTION_STATE_CHANGED, move |data| {
            seen.lock().unwrap().push(data.clone());
            Ok(())
        });

        h.manager.connect().unwrap();
        settle().await;
        h.transport.drop_connection();
        settle().await;

        let payloads = payloads.lock().unwrap();
        assert_eq!(
            payloads[1],
            json!({ "state": "connected", "previous": "connecting", "attempt": 0 })
        );
        assert_eq!(
            payloads[2],
            json!({ "state": "reconnecting", "previous": "connected", "attempt": 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_reflects_state() {
        let h = harness(5);
        let mut rx = h.manager.subscribe_state();
        h.manager.connect().unwrap();

        rx.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
        assert!(h.manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_driver() {
        let h = harness(5);
        h.manager.connect().unwrap();
        settle().await;
        assert!(h.transport.is_open());

        drop(h.manager);
        settle().await;
        assert!(!h.transport.is_open());
    }
}
