use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use moka::sync::Cache;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::doc::SharedDocStore;
use crate::error::{MergeError, PersistError};
use crate::models::messages::{
    InitMessage, LeaveMessage, SaveStateMessage, SendMessage, UpdateMessage,
};
use crate::models::presence::{PeerIdentity, PeerState};
use crate::presence::PresenceChannel;
use crate::server::persist::{
    DocumentRepository, FailureOutcome, PersistPolicy, PersistSchedule, StoredDocument,
};

pub type ConnId = String;
pub type OutboundSender = mpsc::UnboundedSender<SendMessage>;

/// Peer id used for `lastModifiedBy` when a document is seeded from the
/// plain content column rather than a snapshot.
const STORAGE_PEER: &str = "storage";

/// One named synchronization domain: the authoritative shared document, the
/// presence registry and the connections currently bound to it.
///
/// Created lazily on first join; kept in memory while at least one
/// connection is bound or the grace period has not elapsed; flushed and
/// freed afterwards. Durable content outlives the in-memory room.
pub struct Room {
    pub room_id: String,
    pub document_id: Option<Uuid>,
    pub store: SharedDocStore,
    pub presence: PresenceChannel,
    pub schedule: PersistSchedule,
    subs: Vec<(ConnId, OutboundSender)>,
    conn_peers: HashMap<ConnId, String>,
    empty_since: Option<DateTime<Utc>>,
}

impl Room {
    fn new(room_id: String, document_id: Option<Uuid>, store: SharedDocStore, awareness_timeout_ms: u64) -> Self {
        Self {
            room_id,
            document_id,
            store,
            presence: PresenceChannel::new(awareness_timeout_ms),
            schedule: PersistSchedule::new(),
            subs: Vec::new(),
            conn_peers: HashMap::new(),
            empty_since: None,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.subs.len()
    }

    pub fn empty_since(&self) -> Option<DateTime<Utc>> {
        self.empty_since
    }

    fn join(&mut self, conn_id: &str, peer_id: &str, tx: &OutboundSender) {
        if !self.subs.iter().any(|(id, _)| id == conn_id) {
            self.subs.push((conn_id.to_string(), tx.clone()));
        }
        self.conn_peers
            .insert(conn_id.to_string(), peer_id.to_string());
        self.empty_since = None;
    }

    /// Unbind a connection. Explicit leave frames and transport closure both
    /// land here. Returns the peer id that was bound, if any.
    pub fn leave(&mut self, conn_id: &str, now: DateTime<Utc>) -> Option<String> {
        self.subs.retain(|(id, _)| id != conn_id);
        let peer_id = self.conn_peers.remove(conn_id);
        if let Some(peer_id) = &peer_id {
            let delta = self.presence.remove(peer_id);
            if !delta.is_empty() {
                self.broadcast(
                    Some(conn_id),
                    &SendMessage::Leave(LeaveMessage {
                        peer: peer_id.clone(),
                    }),
                );
            }
        }
        if self.subs.is_empty() {
            self.empty_since = Some(now);
        }
        peer_id
    }

    /// Send a frame to every connection in the room except `from`,
    /// pruning subscribers whose channel is gone.
    pub fn broadcast(&mut self, from: Option<&str>, msg: &SendMessage) {
        let mut dead: Vec<ConnId> = Vec::new();
        for (id, tx) in &self.subs {
            if Some(id.as_str()) == from {
                continue;
            }
            if tx.send(msg.clone()).is_err() {
                dead.push(id.clone());
            }
        }
        if !dead.is_empty() {
            self.subs.retain(|(id, _)| !dead.contains(id));
            debug!(
                "Removed {} dead subscribers from room {}",
                dead.len(),
                self.room_id
            );
        }
    }

    /// Merge a peer update into the authoritative replica and relay it to
    /// the other connections (FIFO per sender). A malformed payload is
    /// rejected without affecting the room or the other peers.
    pub fn handle_update(
        &mut self,
        conn_id: &str,
        msg: UpdateMessage,
        now: DateTime<Utc>,
    ) -> Result<(), MergeError> {
        self.store.merge(&msg.payload)?;
        self.schedule.mark_dirty(now);
        self.presence.touch(&msg.peer, now);
        self.broadcast(Some(conn_id), &SendMessage::Update(msg));
        Ok(())
    }

    /// Fold a peer's awareness state into the registry and relay it
    /// verbatim. Never persisted.
    pub fn handle_awareness(&mut self, conn_id: &str, state: PeerState) {
        self.presence.apply_remote(state.clone());
        self.broadcast(
            Some(conn_id),
            &SendMessage::Awareness(crate::models::messages::AwarenessMessage { state }),
        );
    }

    /// Expire silent peers and tell the room about them.
    pub fn purge_presence(&mut self, now: DateTime<Utc>) {
        let delta = self.presence.purge_expired(now);
        for peer_id in delta.removed {
            self.broadcast(None, &SendMessage::Leave(LeaveMessage { peer: peer_id }));
        }
    }
}

/// Owns all live rooms, their durable addressing and the persistence
/// scheduling. Constructed once per server process and passed by handle;
/// there is no process-wide singleton.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Mutex<Room>>>>,
    repository: Arc<dyn DocumentRepository>,
    policy: PersistPolicy,
    grace: Duration,
    awareness_timeout_ms: u64,
    clock: Arc<dyn Clock>,
    /// Room id -> durable document id. Lets a later join without an explicit
    /// document id (or a room resurrected after teardown) keep its
    /// persistence addressing.
    doc_meta: Cache<String, Uuid>,
}

impl RoomRegistry {
    pub fn new(config: &Config, repository: Arc<dyn DocumentRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            repository,
            policy: PersistPolicy::from_config(config),
            grace: Duration::milliseconds(config.room_grace_ms as i64),
            awareness_timeout_ms: config.awareness_timeout_ms,
            clock,
            doc_meta: Cache::builder()
                .max_capacity(100_000)
                .time_to_idle(StdDuration::from_secs(3 * 60 * 60))
                .build(),
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Bind a connection to a room, creating and loading the room first if
    /// needed. Returns the room handle and the init frame for the joiner:
    /// the full current document snapshot plus the current peer list.
    pub async fn join_connection(
        &self,
        conn_id: &str,
        tx: &OutboundSender,
        room_id: &str,
        document_id: Option<Uuid>,
        identity: &PeerIdentity,
    ) -> Result<(Arc<Mutex<Room>>, InitMessage), PersistError> {
        let now = self.clock.now();
        let mut rooms = self.rooms.lock().await;

        if let Some(document_id) = document_id {
            self.doc_meta.insert(room_id.to_string(), document_id);
        }

        let room_arc = match rooms.get(room_id) {
            Some(existing) => existing.clone(),
            None => {
                let created = Arc::new(Mutex::new(self.create_room(room_id, document_id).await?));
                rooms.insert(room_id.to_string(), created.clone());
                created
            }
        };

        let mut room = room_arc.lock().await;
        if room.document_id.is_none() {
            room.document_id = document_id.or_else(|| self.doc_meta.get(room_id));
        }

        room.join(conn_id, &identity.peer_id, tx);
        let state = PeerState::from_identity(identity, now);
        room.presence.apply_remote(state.clone());
        room.broadcast(
            Some(conn_id),
            &SendMessage::Awareness(crate::models::messages::AwarenessMessage { state }),
        );

        let init = InitMessage {
            snapshot: room.store.export_snapshot(),
            peers: room.presence.peer_list(),
        };
        info!(
            "Connection {} joined room {} ({} peers)",
            conn_id,
            room_id,
            room.connection_count()
        );
        drop(room);

        Ok((room_arc, init))
    }

    /// Build a room's document store, loading durable state first so the
    /// first joiner and late joiners alike see the latest stored content.
    async fn create_room(
        &self,
        room_id: &str,
        document_id: Option<Uuid>,
    ) -> Result<Room, PersistError> {
        let document_id = document_id.or_else(|| self.doc_meta.get(room_id));
        let store = match document_id {
            Some(doc_id) => match self.repository.load_document(doc_id).await {
                Ok(Some(stored)) => self.store_from_stored(doc_id, stored),
                Ok(None) => SharedDocStore::new(),
                Err(e) => {
                    // The room still opens; later flush failures surface
                    // through the degraded-mode signal.
                    error!("Failed to load document '{}': {}", doc_id, e);
                    SharedDocStore::new()
                }
            },
            None => SharedDocStore::new(),
        };
        info!("Created room {} (document: {:?})", room_id, document_id);
        Ok(Room::new(
            room_id.to_string(),
            document_id,
            store,
            self.awareness_timeout_ms,
        ))
    }

    fn store_from_stored(&self, doc_id: Uuid, stored: StoredDocument) -> SharedDocStore {
        if let Some(snapshot) = &stored.snapshot {
            match SharedDocStore::from_snapshot(snapshot) {
                Ok(store) => return store,
                Err(e) => {
                    error!("Stored snapshot for '{}' is corrupt: {}", doc_id, e);
                }
            }
        }
        // No usable snapshot: seed a fresh document from the content column.
        let mut store = SharedDocStore::new();
        if let Some(content) = &stored.content {
            store.set_content(content, STORAGE_PEER, self.clock.now());
        }
        store
    }

    /// Periodic maintenance pass: expire silent peers, flush dirty rooms per
    /// the debounce/ceiling policy, and tear down rooms that stayed empty
    /// past the grace period (with a final flush, exactly once).
    pub async fn sweep(&self) {
        let now = self.clock.now();
        let mut rooms = self.rooms.lock().await;
        let mut torn_down: Vec<String> = Vec::new();

        for (room_id, room_arc) in rooms.iter() {
            let mut room = room_arc.lock().await;
            room.purge_presence(now);

            if room.schedule.should_flush(now, &self.policy) {
                self.flush_room(&mut room, now).await;
            }

            if room.connection_count() == 0 {
                if let Some(empty_since) = room.empty_since() {
                    if now - empty_since >= self.grace {
                        if room.schedule.should_attempt(now) {
                            self.flush_room(&mut room, now).await;
                        }
                        // Keep the room alive while a final flush is still
                        // failing; retries continue on later sweeps.
                        if !room.schedule.is_dirty() {
                            torn_down.push(room_id.clone());
                        }
                    }
                }
            }
        }

        for room_id in torn_down {
            rooms.remove(&room_id);
            info!("Room {} idle past grace period, destroyed", room_id);
        }
    }

    /// Write a room's document to durable storage and update the schedule.
    /// Failures are retried with backoff and never block relay; crossing the
    /// retry ceiling broadcasts a degraded-mode signal to the room.
    async fn flush_room(&self, room: &mut Room, now: DateTime<Utc>) {
        let Some(document_id) = room.document_id.or_else(|| self.doc_meta.get(&room.room_id))
        else {
            // Nothing to address the write with; the room is memory-only.
            debug!(
                "Room {} has no durable document id, skipping persistence",
                room.room_id
            );
            room.schedule.record_success();
            return;
        };

        let snapshot = room.store.export_snapshot();
        let content = room.store.content();
        let last_modified_by = room.store.last_modified_by();

        match self
            .repository
            .save_document(document_id, snapshot, content, last_modified_by)
            .await
        {
            Ok(()) => {
                let cleared_degraded = room.schedule.record_success();
                debug!("Persisted room {} to document {}", room.room_id, document_id);
                if cleared_degraded {
                    room.broadcast(
                        None,
                        &SendMessage::SaveState(SaveStateMessage {
                            degraded: false,
                            message: None,
                        }),
                    );
                }
            }
            Err(e) => {
                warn!("Persisting room {} failed: {}", room.room_id, e);
                if room.schedule.record_failure(now, &self.policy)
                    == FailureOutcome::EnteredDegraded
                {
                    error!(
                        "Room {} persistence degraded, changes may not be saved",
                        room.room_id
                    );
                    room.broadcast(
                        None,
                        &SendMessage::SaveState(SaveStateMessage {
                            degraded: true,
                            message: Some("Changes may not be saved".to_string()),
                        }),
                    );
                }
            }
        }
    }

    /// Drive sweeps on a fixed cadence for the life of the registry handle.
    pub fn spawn_sweeper(self: Arc<Self>, interval_ms: u64) -> tokio::task::JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                registry.sweep().await;
            }
        })
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
