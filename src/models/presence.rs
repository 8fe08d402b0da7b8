use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity a client presents when joining a room. Survives
/// room switches; a user with two tabs is two identities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    pub peer_id: String,
    pub display_name: String,
    pub color: String,
}

/// Cursor location inside the diagram, either free coordinates or a
/// reference to a diagram element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CursorRef {
    Point { x: f64, y: f64 },
    Element { element_id: String },
}

/// Ephemeral per-peer state broadcast to the room. Never persisted; removed
/// on disconnect or after the awareness timeout elapses without an update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerState {
    pub peer_id: String,
    pub display_name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorRef>,
    pub last_seen: DateTime<Utc>,
}

impl PeerState {
    pub fn from_identity(identity: &PeerIdentity, at: DateTime<Utc>) -> Self {
        Self {
            peer_id: identity.peer_id.clone(),
            display_name: identity.display_name.clone(),
            color: identity.color.clone(),
            cursor: None,
            last_seen: at,
        }
    }
}
