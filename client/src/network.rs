//! Connection lifecycle, reconnection and message framing
//!
//! The transport runs as a tokio task per connection attempt. It reports
//! lifecycle events over a channel that the main loop drains in
//! [`ConnectionManager::poll`], so every store mutation happens on the main
//! thread in arrival order. Each attempt gets a fresh generation number and
//! events from superseded attempts are dropped.

use crate::game::WorldStore;
use crate::preferences::{PreferenceStore, DEFAULT_USERNAME};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{decode, encode, ClientMessage, Direction, ProtocolError, ServerMessage};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub const DEFAULT_SERVER_URL: &str = "wss://codepath-mmorg.onrender.com";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    /// Fixed delay before every reconnect attempt. No backoff, no jitter.
    pub reconnect_delay: Duration,
    /// Longest a transport may spend opening before the attempt counts as failed.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    /// Torn down on request; nothing reconnects until `connect` is called again.
    Terminated,
}

/// Lifecycle events reported by a transport, tagged with its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened { generation: u64 },
    Message { generation: u64, text: String },
    Error { generation: u64, error: String },
    Closed { generation: u64, reason: String },
}

impl TransportEvent {
    pub fn generation(&self) -> u64 {
        match self {
            TransportEvent::Opened { generation }
            | TransportEvent::Message { generation, .. }
            | TransportEvent::Error { generation, .. }
            | TransportEvent::Closed { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Send(String),
    Close,
}

/// Handle to one open (or opening) transport.
#[derive(Debug)]
pub struct Link {
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl Link {
    pub fn new(commands: mpsc::UnboundedSender<LinkCommand>) -> Self {
        Self { commands }
    }

    fn send(&self, text: String) -> bool {
        self.commands.send(LinkCommand::Send(text)).is_ok()
    }

    fn close(&self) {
        let _ = self.commands.send(LinkCommand::Close);
    }
}

/// Opens transports. Implementations report everything that happens to the
/// transport on `events`, finishing with exactly one `Closed`.
pub trait Connector {
    fn open(
        &mut self,
        config: &ConnectionConfig,
        generation: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Link;
}

/// WebSocket transport spawned on a tokio runtime.
pub struct WsConnector {
    runtime: Handle,
}

impl WsConnector {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Connector for WsConnector {
    fn open(
        &mut self,
        config: &ConnectionConfig,
        generation: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Link {
        let (tx, rx) = mpsc::unbounded_channel();
        self.runtime.spawn(run_websocket(
            config.url.clone(),
            config.connect_timeout,
            generation,
            events,
            rx,
        ));
        Link::new(tx)
    }
}

async fn run_websocket(
    url: String,
    connect_timeout: Duration,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let connected = match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("handshake timed out after {:?}", connect_timeout)),
    };
    let stream = match connected {
        Ok((stream, _)) => stream,
        Err(error) => {
            let _ = events.send(TransportEvent::Error { generation, error });
            let _ = events.send(TransportEvent::Closed {
                generation,
                reason: "connection failed".to_string(),
            });
            return;
        }
    };

    let _ = events.send(TransportEvent::Opened { generation });
    let (mut write, mut read) = stream.split();

    let reason = loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Message { generation, text }).is_err() {
                        break "client dropped".to_string();
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Dropping {}-byte binary frame", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error { generation, error: e.to_string() });
                    break e.to_string();
                }
                None => break "stream ended".to_string(),
            },

            command = commands.recv() => match command {
                Some(LinkCommand::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        let _ = events.send(TransportEvent::Error { generation, error: e.to_string() });
                        break e.to_string();
                    }
                }
                Some(LinkCommand::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break "closed by client".to_string();
                }
            },
        }
    };

    let _ = events.send(TransportEvent::Closed { generation, reason });
}

/// Owns the transport and the local identity, and feeds inbound events into
/// the [`WorldStore`].
pub struct ConnectionManager<C: Connector> {
    config: ConnectionConfig,
    connector: C,
    state: ConnectionState,
    generation: u64,
    link: Option<Link>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    reconnect_at: Option<Instant>,

    preferences: PreferenceStore,
    username: String,
    pending_username: Option<String>,
    rename_in_flight: bool,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(config: ConnectionConfig, connector: C, preferences: PreferenceStore) -> Self {
        let username = preferences
            .username()
            .unwrap_or(DEFAULT_USERNAME)
            .to_string();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            connector,
            state: ConnectionState::Idle,
            generation: 0,
            link: None,
            events_tx,
            events_rx,
            reconnect_at: None,
            preferences,
            username,
            pending_username: None,
            rename_in_flight: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn preferences_mut(&mut self) -> &mut PreferenceStore {
        &mut self.preferences
    }

    /// Opens a new transport unless one is already opening or open.
    pub fn connect(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            debug!("Connect requested while {:?}, ignoring", self.state);
            return;
        }

        self.reconnect_at = None;
        self.generation += 1;
        info!("Connecting to {} (attempt {})", self.config.url, self.generation);

        let link = self
            .connector
            .open(&self.config, self.generation, self.events_tx.clone());
        self.link = Some(link);
        self.state = ConnectionState::Connecting;
    }

    /// Sends an intent if the transport is open. Otherwise the intent is
    /// dropped; the next input tick sends a fresh one.
    pub fn send(&self, message: &ClientMessage) -> bool {
        let link = match (&self.link, self.state) {
            (Some(link), ConnectionState::Open) => link,
            _ => {
                warn!("Not connected, dropping {:?}", message);
                return false;
            }
        };

        let text = match encode(message) {
            Ok(text) => text,
            Err(e) => {
                error!("{}", e);
                return false;
            }
        };

        if !link.send(text) {
            warn!("Transport gone, dropping {:?}", message);
            return false;
        }
        true
    }

    pub fn send_move(&self, direction: Direction) -> bool {
        self.send(&ClientMessage::move_in(direction))
    }

    pub fn send_move_to(&self, x: f32, y: f32) -> bool {
        self.send(&ClientMessage::move_to(x, y))
    }

    pub fn send_stop(&self) -> bool {
        self.send(&ClientMessage::Stop)
    }

    /// Renames the local player: shows the name right away, persists it, and
    /// rejoins on a fresh transport so the server picks it up.
    pub fn change_identity(&mut self, username: &str, store: &mut WorldStore) {
        info!("Changing username to {}", username);
        self.username = username.to_string();
        if let Err(e) = self.preferences.set_username(username) {
            error!("Failed to persist username: {}", e);
        }
        store.rename_local(username);
        // The roster stays so the rename override can apply to the next join.
        store.set_connected(false);

        if let Some(link) = self.link.take() {
            link.close();
        }
        self.pending_username = Some(username.to_string());
        self.rename_in_flight = true;
        self.state = ConnectionState::Closed;
        self.connect();
    }

    /// Tears the connection down for good and cancels any pending reconnect.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.reconnect_at = None;
        self.state = ConnectionState::Terminated;
        info!("Disconnected from game server");
    }

    /// Applies every queued transport event, then fires the reconnect timer
    /// if it is due. Returns the number of events handled.
    pub fn poll(&mut self, now: Instant, store: &mut WorldStore) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            handled += 1;
            self.handle_event(event, now, store);
        }

        if let Some(at) = self.reconnect_at {
            if now >= at {
                self.reconnect_at = None;
                self.connect();
            }
        }

        handled
    }

    fn handle_event(&mut self, event: TransportEvent, now: Instant, store: &mut WorldStore) {
        if event.generation() != self.generation || self.state == ConnectionState::Terminated {
            debug!("Ignoring event from superseded transport: {:?}", event);
            return;
        }

        match event {
            TransportEvent::Opened { .. } => {
                info!("Connected to game server");
                self.state = ConnectionState::Open;
                store.set_connected(true);

                if let Some(pending) = self.pending_username.take() {
                    self.username = pending;
                }
                self.send(&ClientMessage::join(self.username.clone()));
            }

            TransportEvent::Message { text, .. } => match decode(&text) {
                Ok(message) => self.handle_message(message, store),
                Err(ProtocolError::UnknownAction(action)) => {
                    warn!("Unknown message action {:?}: {}", action, text);
                }
                Err(e) => error!("Failed to parse message: {}", e),
            },

            TransportEvent::Error { error, .. } => {
                error!("WebSocket error: {}", error);
            }

            TransportEvent::Closed { reason, .. } => {
                warn!(
                    "Disconnected from game server ({}), reconnecting in {:?}",
                    reason, self.config.reconnect_delay
                );
                self.state = ConnectionState::Closed;
                self.link = None;
                store.reset();
                self.reconnect_at = Some(now + self.config.reconnect_delay);
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage, store: &mut WorldStore) {
        match message {
            ServerMessage::JoinGame(response) => {
                if !response.success {
                    error!("Failed to join game: {:?}", response);
                    return;
                }
                let Some(player_id) = response.player_id.clone() else {
                    error!("Join response without a player id");
                    return;
                };

                let local_name = self.rename_in_flight.then(|| self.username.clone());
                self.rename_in_flight = false;
                info!("Joined game as {} ({})", self.username, player_id);
                store.apply_join(player_id, response, local_name.as_deref());
            }

            ServerMessage::PlayersMoved { players } => store.apply_players_moved(players),

            ServerMessage::PlayerJoined { player, avatar } => {
                debug!("Player joined: {} ({})", player.username, player.id);
                store.apply_player_joined(player, avatar);
            }

            ServerMessage::PlayerLeft { player_id } => {
                debug!("Player left: {}", player_id);
                store.apply_player_left(&player_id);
            }
        }
    }
}
