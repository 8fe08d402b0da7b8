use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::client::sync::{SyncEngine, SyncEvent, SyncTuning};
use crate::client::view::DiagramView;
use crate::doc::SharedDocStore;
use crate::error::TransportError;
use crate::models::messages::{
    AwarenessMessage, JoinMessage, LeaveMessage, PingMessage, ReceivedMessage, SendMessage,
    UpdateMessage,
};
use crate::models::presence::{CursorRef, PeerIdentity, PeerState};
use crate::presence::{PresenceChannel, PresenceDelta};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Transport lifecycle as exposed to the consumer (presence indicators etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Everything the consumer can observe about a session, as one typed stream.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connection(ConnectionState),
    Sync(SyncEvent),
    Presence(PresenceDelta),
    Persistence { degraded: bool },
}

/// Tuning for a client session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub room_id: String,
    pub document_id: Option<Uuid>,
    pub identity: PeerIdentity,
    pub tuning: SyncTuning,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Cadence of the internal poll tick driving debounce windows.
    pub tick_ms: u64,
    pub ping_interval_ms: u64,
    pub awareness_timeout_ms: u64,
}

impl SessionConfig {
    pub fn new(url: &str, room_id: &str, identity: PeerIdentity) -> Self {
        let defaults = crate::config::Config::default();
        Self {
            url: url.to_string(),
            room_id: room_id.to_string(),
            document_id: None,
            identity,
            tuning: SyncTuning::default(),
            reconnect_base_ms: defaults.reconnect_base_ms,
            reconnect_max_ms: defaults.reconnect_max_ms,
            tick_ms: 50,
            ping_interval_ms: 10_000,
            awareness_timeout_ms: defaults.awareness_timeout_ms,
        }
    }
}

enum Command {
    LocalEdit,
    Cursor(Option<CursorRef>),
    ChangeRoom {
        room_id: String,
        document_id: Option<Uuid>,
    },
    Disconnect,
}

enum LoopExit {
    Disconnect,
    TransportLost,
}

/// One attached collaboration session: owns the transport, the shared
/// document replica, the sync engine and the presence channel for the
/// currently bound room. Constructed per attachment and detached
/// explicitly; there is no process-wide instance.
pub struct CollabSession {
    commands: mpsc::UnboundedSender<Command>,
    task: tokio::task::JoinHandle<()>,
}

impl CollabSession {
    /// Attach to a room. Returns the session handle and the event stream the
    /// consumer (UI layer) subscribes to.
    pub fn attach(
        config: SessionConfig,
        view: Arc<StdMutex<dyn DiagramView>>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(config, view, clock, events_tx, commands_rx));
        (
            Self {
                commands: commands_tx,
                task,
            },
            events_rx,
        )
    }

    /// Tell the session the user edited the local document.
    pub fn note_local_edit(&self) {
        let _ = self.commands.send(Command::LocalEdit);
    }

    /// Publish a cursor move to the room.
    pub fn set_cursor(&self, cursor: Option<CursorRef>) {
        let _ = self.commands.send(Command::Cursor(cursor));
    }

    /// Rebind the session to another room without dropping the transport or
    /// re-registering the peer identity.
    pub fn change_room(
        &self,
        room_id: &str,
        document_id: Option<Uuid>,
    ) -> Result<(), TransportError> {
        self.commands
            .send(Command::ChangeRoom {
                room_id: room_id.to_string(),
                document_id,
            })
            .map_err(|_| TransportError::Closed)
    }

    /// Detach: leave the room, close the transport and stop the task.
    pub async fn detach(self) {
        let _ = self.commands.send(Command::Disconnect);
        let _ = self.task.await;
    }
}

async fn run_session(
    mut config: SessionConfig,
    view: Arc<StdMutex<dyn DiagramView>>,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut engine = SyncEngine::new(&config.identity.peer_id, config.tuning.clone());
    let mut store = SharedDocStore::new();
    let mut presence = PresenceChannel::new(config.awareness_timeout_ms);
    let mut attempt: u32 = 0;

    loop {
        let state = if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        let _ = events.send(SessionEvent::Connection(state));

        match connect_async(config.url.as_str()).await {
            Ok((ws, _response)) => {
                attempt = 0;
                info!("Connected to collaboration server at {}", config.url);
                let _ = events.send(SessionEvent::Connection(ConnectionState::Connected));

                let exit = session_loop(
                    &mut config,
                    ws,
                    &view,
                    &clock,
                    &events,
                    &mut commands,
                    &mut engine,
                    &mut store,
                    &mut presence,
                )
                .await;

                let _ = events.send(SessionEvent::Connection(ConnectionState::Disconnected));
                if matches!(exit, LoopExit::Disconnect) {
                    return;
                }
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", config.url, e);
            }
        }

        // Backoff before the next attempt; a disconnect request during the
        // wait ends the session instead.
        attempt += 1;
        let delay = reconnect_delay_ms(attempt, config.reconnect_base_ms, config.reconnect_max_ms);
        debug!("Reconnecting in {} ms (attempt {})", delay, attempt);
        tokio::select! {
            _ = tokio::time::sleep(StdDuration::from_millis(delay)) => {}
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Disconnect) | None => return,
                    // Room changes while offline take effect on reconnect.
                    Some(Command::ChangeRoom { room_id, document_id }) => {
                        config.room_id = room_id;
                        config.document_id = document_id;
                        engine.reset_room_state();
                        store = SharedDocStore::new();
                        presence = PresenceChannel::new(config.awareness_timeout_ms);
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn session_loop(
    config: &mut SessionConfig,
    mut ws: WsStream,
    view: &Arc<StdMutex<dyn DiagramView>>,
    clock: &Arc<dyn Clock>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    engine: &mut SyncEngine,
    store: &mut SharedDocStore,
    presence: &mut PresenceChannel,
) -> LoopExit {
    let now = clock.now();
    presence.set_local_state(PeerState::from_identity(&config.identity, now), now);

    if send_frame(
        &mut ws,
        &ReceivedMessage::Join(JoinMessage {
            room_id: config.room_id.clone(),
            document_id: config.document_id,
            peer: config.identity.clone(),
        }),
    )
    .await
    .is_err()
    {
        return LoopExit::TransportLost;
    }

    let mut tick = tokio::time::interval(StdDuration::from_millis(config.tick_ms));
    let mut last_ping_at: Option<DateTime<Utc>> = None;

    loop {
        tokio::select! {
            frame = ws.next() => {
                let Some(Ok(frame)) = frame else {
                    warn!("Transport to {} lost", config.url);
                    return LoopExit::TransportLost;
                };
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => return LoopExit::TransportLost,
                    _ => continue,
                };
                match serde_json::from_str::<SendMessage>(text.as_str()) {
                    Ok(msg) => {
                        let now = clock.now();
                        let outcome =
                            handle_server_frame(msg, now, view, events, engine, store, presence);
                        for event in outcome {
                            if let Err(e) =
                                dispatch_engine_event(&mut ws, config, events, event, now).await
                            {
                                warn!("Sending update failed: {}", e);
                                return LoopExit::TransportLost;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Discarding unparseable server frame: {}", e);
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::LocalEdit) => {
                        engine.note_local_edit(clock.now());
                    }
                    Some(Command::Cursor(cursor)) => {
                        if let Some(state) = presence.set_local_cursor(cursor, clock.now()) {
                            if send_frame(&mut ws, &ReceivedMessage::Awareness(AwarenessMessage { state }))
                                .await
                                .is_err()
                            {
                                return LoopExit::TransportLost;
                            }
                        }
                    }
                    Some(Command::ChangeRoom { room_id, document_id }) => {
                        info!("Switching room {} -> {}", config.room_id, room_id);
                        config.room_id = room_id;
                        config.document_id = document_id;
                        engine.reset_room_state();
                        *store = SharedDocStore::new();
                        *presence = PresenceChannel::new(config.awareness_timeout_ms);
                        let now = clock.now();
                        presence.set_local_state(PeerState::from_identity(&config.identity, now), now);
                        let join = ReceivedMessage::Join(JoinMessage {
                            room_id: config.room_id.clone(),
                            document_id: config.document_id,
                            peer: config.identity.clone(),
                        });
                        if send_frame(&mut ws, &join).await.is_err() {
                            return LoopExit::TransportLost;
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        let leave = ReceivedMessage::Leave(LeaveMessage {
                            peer: config.identity.peer_id.clone(),
                        });
                        let _ = send_frame(&mut ws, &leave).await;
                        let _ = ws.close(None).await;
                        return LoopExit::Disconnect;
                    }
                }
            }
            _ = tick.tick() => {
                let now = clock.now();

                let outcome = {
                    let mut view = view.lock().unwrap();
                    engine.poll(now, &mut *view, store)
                };
                for event in outcome {
                    if let Err(e) = dispatch_engine_event(&mut ws, config, events, event, now).await {
                        warn!("Sending update failed: {}", e);
                        return LoopExit::TransportLost;
                    }
                }

                let expired = presence.purge_expired(now);
                if !expired.is_empty() {
                    let _ = events.send(SessionEvent::Presence(expired));
                }

                let ping_due = last_ping_at
                    .map(|at| now - at >= chrono::Duration::milliseconds(config.ping_interval_ms as i64))
                    .unwrap_or(true);
                if ping_due {
                    last_ping_at = Some(now);
                    let ping = ReceivedMessage::Ping(PingMessage {
                        peer: config.identity.peer_id.clone(),
                    });
                    if send_frame(&mut ws, &ping).await.is_err() {
                        return LoopExit::TransportLost;
                    }
                }
            }
        }
    }
}

/// Fold one server frame into the local replica. Returns engine outcomes
/// that still need dispatching (join reconciliation may produce a seed or
/// push that must reach the wire).
fn handle_server_frame(
    msg: SendMessage,
    now: DateTime<Utc>,
    view: &Arc<StdMutex<dyn DiagramView>>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    engine: &mut SyncEngine,
    store: &mut SharedDocStore,
    presence: &mut PresenceChannel,
) -> Vec<SyncEvent> {
    match msg {
        SendMessage::Init(init) => {
            if !init.snapshot.is_empty() {
                if let Err(e) = store.merge(&init.snapshot) {
                    error!("Initial snapshot rejected: {}", e);
                }
            }
            let mut delta = PresenceDelta::default();
            for peer in init.peers {
                let peer_delta = presence.apply_remote(peer);
                delta.added.extend(peer_delta.added);
                delta.updated.extend(peer_delta.updated);
            }
            if !delta.is_empty() {
                let _ = events.send(SessionEvent::Presence(delta));
            }
            let mut view = view.lock().unwrap();
            engine.reconcile_on_join(now, &mut *view, store)
        }
        SendMessage::Update(update) => {
            match store.merge(&update.payload) {
                Ok(()) => engine.note_remote_change(now),
                Err(e) => warn!("Remote update rejected: {}", e),
            }
            Vec::new()
        }
        SendMessage::Awareness(awareness) => {
            let delta = presence.apply_remote(awareness.state);
            let _ = events.send(SessionEvent::Presence(delta));
            Vec::new()
        }
        SendMessage::Leave(leave) => {
            let delta = presence.remove(&leave.peer);
            if !delta.is_empty() {
                let _ = events.send(SessionEvent::Presence(delta));
            }
            Vec::new()
        }
        SendMessage::Pong(_) => Vec::new(),
        SendMessage::SaveState(save_state) => {
            let _ = events.send(SessionEvent::Persistence {
                degraded: save_state.degraded,
            });
            Vec::new()
        }
        SendMessage::Error(e) => {
            warn!("Server error frame: {} {}", e.code, e.message);
            Vec::new()
        }
    }
}

/// Transmit engine outcomes that carry wire payloads; everything is also
/// surfaced on the event stream.
async fn dispatch_engine_event(
    ws: &mut WsStream,
    config: &SessionConfig,
    events: &mpsc::UnboundedSender<SessionEvent>,
    event: SyncEvent,
    now: DateTime<Utc>,
) -> Result<(), TransportError> {
    match &event {
        SyncEvent::PushedLocal { update, .. } | SyncEvent::SeededDocument { update, .. } => {
            let frame = ReceivedMessage::Update(UpdateMessage {
                payload: update.clone(),
                peer: config.identity.peer_id.clone(),
                sent_at: now,
            });
            send_frame(ws, &frame).await?;
        }
        _ => {}
    }
    let _ = events.send(SessionEvent::Sync(event));
    Ok(())
}

/// Bounded exponential backoff for reconnect attempts (1-based).
fn reconnect_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let shift = std::cmp::min(attempt.saturating_sub(1), 6);
    std::cmp::min(base_ms.saturating_mul(1 << shift), max_ms)
}

async fn send_frame<T: serde::Serialize>(
    ws: &mut WsStream,
    frame: &T,
) -> Result<(), TransportError> {
    let text = serde_json::to_string(frame)
        .map_err(|e| TransportError::InvalidFrame(e.to_string()))?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
