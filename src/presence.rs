use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::presence::{CursorRef, PeerState};

/// Delta produced by a presence mutation, for consumers that render peer
/// lists and cursors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceDelta {
    pub added: Vec<PeerState>,
    pub updated: Vec<PeerState>,
    pub removed: Vec<String>,
}

impl PresenceDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    fn added(state: PeerState) -> Self {
        Self {
            added: vec![state],
            ..Default::default()
        }
    }

    fn updated(state: PeerState) -> Self {
        Self {
            updated: vec![state],
            ..Default::default()
        }
    }
}

/// Ephemeral per-peer state for one room: identity, color, cursor, liveness.
///
/// Keyed per connection, not per user. Nothing here is persisted; the whole
/// channel is discarded on room destruction. Peers that stop updating for
/// longer than the timeout are expired independently of any disconnect
/// notice.
pub struct PresenceChannel {
    states: HashMap<String, PeerState>,
    timeout: Duration,
    local_peer_id: Option<String>,
}

impl PresenceChannel {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            states: HashMap::new(),
            timeout: Duration::milliseconds(timeout_ms as i64),
            local_peer_id: None,
        }
    }

    /// Publish or replace this peer's own state. Returns the state to
    /// broadcast.
    pub fn set_local_state(
        &mut self,
        mut state: PeerState,
        at: DateTime<Utc>,
    ) -> PeerState {
        state.last_seen = at;
        self.local_peer_id = Some(state.peer_id.clone());
        self.states.insert(state.peer_id.clone(), state.clone());
        state
    }

    /// Update only the local cursor, keeping identity fields.
    pub fn set_local_cursor(
        &mut self,
        cursor: Option<CursorRef>,
        at: DateTime<Utc>,
    ) -> Option<PeerState> {
        let peer_id = self.local_peer_id.clone()?;
        let state = self.states.get_mut(&peer_id)?;
        state.cursor = cursor;
        state.last_seen = at;
        Some(state.clone())
    }

    /// Ingest a state broadcast by another peer.
    pub fn apply_remote(&mut self, state: PeerState) -> PresenceDelta {
        match self.states.insert(state.peer_id.clone(), state.clone()) {
            None => PresenceDelta::added(state),
            Some(_) => PresenceDelta::updated(state),
        }
    }

    /// Refresh a peer's liveness without changing its published fields.
    pub fn touch(&mut self, peer_id: &str, at: DateTime<Utc>) {
        if let Some(state) = self.states.get_mut(peer_id) {
            state.last_seen = at;
        }
    }

    /// Remove a peer explicitly (leave frame or connection close).
    pub fn remove(&mut self, peer_id: &str) -> PresenceDelta {
        match self.states.remove(peer_id) {
            Some(_) => PresenceDelta {
                removed: vec![peer_id.to_string()],
                ..Default::default()
            },
            None => PresenceDelta::default(),
        }
    }

    /// Expire peers with no update within the timeout window. Tolerates
    /// ungraceful network loss where no leave frame ever arrives.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> PresenceDelta {
        let cutoff = now - self.timeout;
        let expired: Vec<String> = self
            .states
            .iter()
            .filter(|(_, s)| s.last_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.states.remove(id);
            debug!("Expired presence for peer {}", id);
        }
        PresenceDelta {
            removed: expired,
            ..Default::default()
        }
    }

    pub fn states(&self) -> &HashMap<String, PeerState> {
        &self.states
    }

    pub fn peer_list(&self) -> Vec<PeerState> {
        self.states.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
