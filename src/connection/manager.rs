//! Connection manager actor.
//!
//! The manager owns one outbound socket to the relay. All socket state
//! lives inside a single tokio task; the public [`ConnectionManager`]
//! handle talks to it over a command channel, so the invariant of at most
//! one live socket and at most one pending reconnect timer is structural.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open──▶ Connected
//!      ▲                          │                    │
//!      │                    attempt failed       unexpected close
//!      │                          ▼                    ▼
//!      └──────disconnect()── reconnect timer ◀─────────┘
//!                             (single, fixed delay)
//! ```
//!
//! Reconnection is attempted indefinitely while a connection is desired.
//! Regaining foreground focus retries immediately, bypassing the timer,
//! so the link recovers quickly after system sleep where the timer itself
//! may not have fired.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Sleep, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::protocol::Message;

use super::{ConnectionState, LinkEvent, MessageSender};

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the event fan-out channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// Outbound client socket.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frame-level result from the socket stream.
type WsResult<T> = std::result::Result<T, tokio_tungstenite::tungstenite::Error>;

/// Internal commands for the actor task.
enum ManagerCommand {
    /// Open a connection (no-op when one exists).
    Connect,
    /// Close the connection and cancel any pending reconnect.
    Disconnect,
    /// Switch to a new relay endpoint.
    SetUrl(LinkConfig),
    /// Transmit a serialized frame, reporting success.
    Send(String, oneshot::Sender<bool>),
    /// The process regained foreground focus.
    FocusGained,
    /// Terminate the actor.
    Shutdown,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Handle to the connection actor.
///
/// Cheap to clone; all clones drive the same socket.
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new(LinkConfig::new().with_port(7860));
/// let mut events = manager.subscribe();
/// manager.connect();
///
/// while let Ok(event) = events.recv().await {
///     match event {
///         LinkEvent::Message(message) => handle(message),
///         LinkEvent::ConnectionChanged(state) => update_indicator(state),
///     }
/// }
/// ```
pub struct ConnectionManager {
    /// Channel into the actor task.
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
    /// Event fan-out (shared with the actor).
    events: broadcast::Sender<LinkEvent>,
    /// Observable logical state (written only by the actor).
    state: Arc<Mutex<ConnectionState>>,
}

impl Clone for ConnectionManager {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl ConnectionManager {
    /// Creates a manager and spawns its actor task.
    ///
    /// The manager starts disconnected; call [`connect`](Self::connect)
    /// to open the link.
    #[must_use]
    pub fn new(config: LinkConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(ConnectionState::Disconnected));

        let actor = Actor {
            config,
            desired: false,
            socket: None,
            reconnect: None,
            events: events.clone(),
            state: Arc::clone(&state),
        };
        tokio::spawn(actor.run(command_rx));

        Self {
            command_tx,
            events,
            state,
        }
    }

    /// Requests a connection. Idempotent; no-op when a socket exists.
    pub fn connect(&self) {
        let _ = self.command_tx.send(ManagerCommand::Connect);
    }

    /// Closes the connection and cancels any scheduled reconnection.
    ///
    /// Safe to call when already disconnected.
    pub fn disconnect(&self) {
        let _ = self.command_tx.send(ManagerCommand::Disconnect);
    }

    /// Switches to a new relay URL.
    ///
    /// No-op when the endpoint is unchanged; otherwise, if a connection
    /// was desired, the current one is torn down and reopened against the
    /// new endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`](crate::Error::Protocol) when the URL
    /// does not parse.
    pub fn set_url(&self, url: &str) -> Result<()> {
        let config = LinkConfig::from_url(url)?;
        let _ = self.command_tx.send(ManagerCommand::SetUrl(config));
        Ok(())
    }

    /// Notifies the manager that the process became active/visible again.
    ///
    /// Triggers an immediate reconnect attempt when a connection is
    /// desired but none is live, independent of the pending timer.
    pub fn notify_focus(&self) {
        let _ = self.command_tx.send(ManagerCommand::FocusGained);
    }

    /// Sends a message over the live socket.
    ///
    /// Returns `false` without error when not currently connected or when
    /// transmission fails.
    pub async fn send(&self, message: &Message) -> bool {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound message");
                return false;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(ManagerCommand::Send(json, reply_tx))
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Returns the current logical connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Subscribes to connection and message events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Terminates the actor task. Called at process exit.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ManagerCommand::Shutdown);
    }
}

#[async_trait::async_trait]
impl MessageSender for ConnectionManager {
    async fn send(&self, message: &Message) -> bool {
        ConnectionManager::send(self, message).await
    }
}

// ============================================================================
// Actor
// ============================================================================

/// The actor owning all connection state.
struct Actor {
    /// Endpoint configuration; replaced through `SetUrl`.
    config: LinkConfig,
    /// Whether a connection is currently wanted.
    desired: bool,
    /// The live socket, if any.
    socket: Option<WsStream>,
    /// The pending reconnect timer, if any.
    reconnect: Option<Pin<Box<Sleep>>>,
    /// Event fan-out.
    events: broadcast::Sender<LinkEvent>,
    /// Observable state mirror.
    state: Arc<Mutex<ConnectionState>>,
}

impl Actor {
    /// Event loop. Runs until shutdown or until all handles drop.
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<ManagerCommand>) {
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("All manager handles dropped");
                        break;
                    };
                    if self.handle_command(command).await {
                        break;
                    }
                }

                frame = next_frame(&mut self.socket), if self.socket.is_some() => {
                    self.handle_frame(frame);
                }

                () = wait_timer(&mut self.reconnect), if self.reconnect.is_some() => {
                    self.reconnect = None;
                    if self.desired && self.socket.is_none() {
                        debug!("Reconnect timer fired");
                        self.establish().await;
                    }
                }
            }
        }

        self.teardown_socket().await;
        debug!("Connection actor terminated");
    }

    /// Handles one command; returns `true` to terminate the actor.
    async fn handle_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::Connect => {
                self.desired = true;
                if self.socket.is_none() {
                    self.establish().await;
                }
            }

            ManagerCommand::Disconnect => {
                self.desired = false;
                self.reconnect = None;
                if self.socket.is_some() {
                    self.teardown_socket().await;
                    self.transition(ConnectionState::Disconnected, true);
                } else {
                    self.transition(ConnectionState::Disconnected, false);
                }
            }

            ManagerCommand::SetUrl(config) => {
                if config.ws_url() == self.config.ws_url() {
                    return false;
                }
                info!(url = %config.ws_url(), "Relay URL changed");
                self.config.host = config.host;
                self.config.port = config.port;
                self.config.secure = config.secure;

                if self.desired {
                    self.reconnect = None;
                    if self.socket.is_some() {
                        self.teardown_socket().await;
                        self.transition(ConnectionState::Disconnected, true);
                    }
                    self.establish().await;
                }
            }

            ManagerCommand::Send(json, reply_tx) => {
                let sent = self.transmit(json).await;
                let _ = reply_tx.send(sent);
            }

            ManagerCommand::FocusGained => {
                if self.desired && self.socket.is_none() {
                    debug!("Focus regained while disconnected, reconnecting now");
                    self.reconnect = None;
                    self.establish().await;
                }
            }

            ManagerCommand::Shutdown => {
                debug!("Shutdown command received");
                return true;
            }
        }
        false
    }

    /// Opens a socket to the configured endpoint.
    ///
    /// On failure the attempt is rescheduled after the configured delay.
    async fn establish(&mut self) {
        let url = self.config.ws_url();
        self.transition(ConnectionState::Connecting, false);
        debug!(url = %url, "Connecting to relay");

        let attempt = timeout(self.config.connect_timeout, connect_async(&url)).await;
        match attempt {
            Ok(Ok((socket, _response))) => {
                info!(url = %url, "Relay connection established");
                self.socket = Some(socket);
                self.reconnect = None;
                self.transition(ConnectionState::Connected, true);
            }
            Ok(Err(e)) => {
                let err = Error::connection(e.to_string());
                warn!(url = %url, error = %err, "Relay connection failed");
                self.transition(ConnectionState::Disconnected, false);
                self.schedule_reconnect();
            }
            Err(_) => {
                let timeout_ms = self.config.connect_timeout.as_millis() as u64;
                let err = Error::connection_timeout(timeout_ms);
                warn!(url = %url, error = %err, "Relay connection failed");
                self.transition(ConnectionState::Disconnected, false);
                self.schedule_reconnect();
            }
        }
    }

    /// Handles one inbound frame or stream termination.
    fn handle_frame(&mut self, frame: Option<WsResult<WsMessage>>) {
        match frame {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Message>(&text) {
                Ok(message) => {
                    let _ = self.events.send(LinkEvent::Message(message));
                }
                // A malformed payload fails only this dispatch.
                Err(e) => {
                    warn!(error = %e, "Dropping malformed inbound frame");
                }
            },

            Some(Ok(WsMessage::Close(_))) => {
                debug!("Socket closed by peer");
                self.lose_socket();
            }

            // Ignore Binary, Ping, Pong.
            Some(Ok(_)) => {}

            Some(Err(e)) => {
                warn!(error = %e, "Socket error");
                self.lose_socket();
            }

            None => {
                debug!("Socket stream ended");
                self.lose_socket();
            }
        }
    }

    /// Drops a dead socket and schedules recovery while desired.
    ///
    /// Errors are not distinguished by type; every unexpected close takes
    /// the same retry path.
    fn lose_socket(&mut self) {
        self.socket = None;
        self.transition(ConnectionState::Disconnected, true);
        if self.desired {
            self.schedule_reconnect();
        }
    }

    /// Transmits one serialized frame; `false` when not connected.
    async fn transmit(&mut self, json: String) -> bool {
        let Some(socket) = &mut self.socket else {
            debug!("Send requested while disconnected");
            return false;
        };

        match socket.send(WsMessage::Text(json.into())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Send failed, dropping socket");
                self.lose_socket();
                false
            }
        }
    }

    /// Schedules the single reconnect attempt, unless one is pending.
    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_none() {
            debug!(delay = ?self.config.reconnect_delay, "Reconnect scheduled");
            self.reconnect = Some(Box::pin(sleep(self.config.reconnect_delay)));
        }
    }

    /// Closes the socket if open. Closing an already-closed socket is a no-op.
    async fn teardown_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }

    /// Updates the observable state, optionally emitting `connectionChanged`.
    fn transition(&self, next: ConnectionState, emit: bool) {
        *self.state.lock() = next;
        if emit {
            let _ = self.events.send(LinkEvent::ConnectionChanged(next));
        }
    }
}

// ============================================================================
// Select Helpers
// ============================================================================

/// Reads the next frame, parking forever when no socket exists.
///
/// The select arm is guarded on `socket.is_some()`; the pending branch
/// only keeps the future safe to construct.
async fn next_frame(socket: &mut Option<WsStream>) -> Option<WsResult<WsMessage>> {
    match socket {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

/// Waits for the reconnect timer, parking forever when none is pending.
async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    use crate::protocol::{LoadImage, TargetId};
    use crate::relay::Relay;

    /// Opt-in log output for debugging test runs (`RUST_LOG=debug`).
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Config pointed at an in-process relay, with test-friendly delays.
    fn test_config(relay: &Relay) -> LinkConfig {
        LinkConfig::new()
            .with_host("127.0.0.1")
            .with_port(relay.port())
            .with_reconnect_delay(Duration::from_millis(200))
            .with_connect_timeout(Duration::from_secs(2))
    }

    /// Waits for the next `ConnectionChanged` matching `expected`,
    /// skipping message events.
    async fn wait_for_state(
        events: &mut broadcast::Receiver<LinkEvent>,
        expected: ConnectionState,
    ) {
        let deadline = Duration::from_secs(5);
        timeout(deadline, async {
            loop {
                match events.recv().await.expect("event stream closed") {
                    LinkEvent::ConnectionChanged(state) if state == expected => return,
                    _ => continue,
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {expected}"));
    }

    /// Waits for the next parsed message event.
    async fn wait_for_message(events: &mut broadcast::Receiver<LinkEvent>) -> Message {
        timeout(Duration::from_secs(5), async {
            loop {
                if let LinkEvent::Message(message) =
                    events.recv().await.expect("event stream closed")
                {
                    return message;
                }
            }
        })
        .await
        .expect("timed out waiting for message")
    }

    /// Polls until the relay sees `count` clients.
    async fn wait_for_clients(relay: &Relay, count: usize) {
        timeout(Duration::from_secs(5), async {
            while relay.client_count() != count {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("relay never reached {count} clients"));
    }

    #[tokio::test]
    async fn test_connect_and_round_trip() {
        init_tracing();
        let relay = Relay::bind(0).await.expect("relay bind");

        let sender = ConnectionManager::new(test_config(&relay));
        let receiver = ConnectionManager::new(test_config(&relay));

        let mut sender_events = sender.subscribe();
        let mut receiver_events = receiver.subscribe();

        sender.connect();
        receiver.connect();
        wait_for_state(&mut sender_events, ConnectionState::Connected).await;
        wait_for_state(&mut receiver_events, ConnectionState::Connected).await;

        let message = Message::LoadImage(
            LoadImage::new(TargetId::img2img()).with_url("http://127.0.0.1/a.png"),
        );
        assert!(sender.send(&message).await);

        let received = wait_for_message(&mut receiver_events).await;
        assert_eq!(received, message);

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_while_disconnected_returns_false() {
        let manager = ConnectionManager::new(LinkConfig::new().with_port(1));
        let message =
            Message::LoadImage(LoadImage::new(TargetId::img2img()).with_url("http://x/a.png"));
        assert!(!manager.send(&message).await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let relay = Relay::bind(0).await.expect("relay bind");
        let manager = ConnectionManager::new(test_config(&relay));
        let mut events = manager.subscribe();

        manager.connect();
        wait_for_state(&mut events, ConnectionState::Connected).await;
        manager.connect();
        manager.connect();

        // Give redundant connects a chance to (incorrectly) open sockets.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(relay.client_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_unexpected_close_reconnects_after_delay() {
        init_tracing();
        let relay = Relay::bind(0).await.expect("relay bind");
        let manager = ConnectionManager::new(test_config(&relay));
        let mut events = manager.subscribe();

        manager.connect();
        wait_for_state(&mut events, ConnectionState::Connected).await;

        relay.kick_all();
        wait_for_state(&mut events, ConnectionState::Disconnected).await;

        // One attempt after the 200ms delay, no thundering retries.
        wait_for_state(&mut events, ConnectionState::Connected).await;
        wait_for_clients(&relay, 1).await;

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_focus_bypasses_reconnect_timer() {
        let relay = Relay::bind(0).await.expect("relay bind");
        let config = test_config(&relay).with_reconnect_delay(Duration::from_secs(60));
        let manager = ConnectionManager::new(config);
        let mut events = manager.subscribe();

        manager.connect();
        wait_for_state(&mut events, ConnectionState::Connected).await;

        relay.kick_all();
        wait_for_state(&mut events, ConnectionState::Disconnected).await;

        // The 60s timer has not fired; focus recovery must not wait for it.
        manager.notify_focus();
        wait_for_state(&mut events, ConnectionState::Connected).await;

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let relay = Relay::bind(0).await.expect("relay bind");
        let manager = ConnectionManager::new(test_config(&relay));
        let mut events = manager.subscribe();

        manager.connect();
        wait_for_state(&mut events, ConnectionState::Connected).await;

        relay.kick_all();
        wait_for_state(&mut events, ConnectionState::Disconnected).await;

        manager.disconnect();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(relay.client_count(), 0);

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_when_already_disconnected_is_harmless() {
        let manager = ConnectionManager::new(LinkConfig::new());
        manager.disconnect();
        manager.disconnect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_set_url_moves_a_desired_connection() {
        let relay_a = Relay::bind(0).await.expect("relay bind");
        let relay_b = Relay::bind(0).await.expect("relay bind");

        let manager = ConnectionManager::new(test_config(&relay_a));
        let mut events = manager.subscribe();

        manager.connect();
        wait_for_state(&mut events, ConnectionState::Connected).await;
        assert_eq!(relay_a.client_count(), 1);

        manager.set_url(&relay_b.ws_url()).expect("valid url");
        wait_for_clients(&relay_b, 1).await;
        wait_for_clients(&relay_a, 0).await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        relay_a.shutdown().await;
        relay_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_url_rejects_invalid_urls() {
        let manager = ConnectionManager::new(LinkConfig::new());
        assert!(manager.set_url("not a url").is_err());
        assert!(manager.set_url("ftp://host:21").is_err());
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_tear_down_connection() {
        let relay = Relay::bind(0).await.expect("relay bind");

        let receiver = ConnectionManager::new(test_config(&relay));
        let mut events = receiver.subscribe();
        receiver.connect();
        wait_for_state(&mut events, ConnectionState::Connected).await;

        // A raw peer pushes garbage through the relay.
        let (mut raw, _) = connect_async(relay.ws_url()).await.expect("raw connect");
        raw.send(WsMessage::Text("this is not json".into()))
            .await
            .expect("send garbage");

        // The next valid frame still arrives on the same connection.
        let valid = Message::LoadImage(
            LoadImage::new(TargetId::inpaint()).with_local_path("/tmp/a.png"),
        );
        raw.send(WsMessage::Text(
            serde_json::to_string(&valid).expect("serialize").into(),
        ))
        .await
        .expect("send valid");

        let received = wait_for_message(&mut events).await;
        assert_eq!(received, valid);
        assert_eq!(receiver.state(), ConnectionState::Connected);

        relay.shutdown().await;
    }
}
