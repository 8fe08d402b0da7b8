use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, base64::Base64};

use crate::models::presence::{PeerIdentity, PeerState};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<uuid::Uuid>,
    pub peer: PeerIdentity,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    /// Opaque CRDT update blob, relayed verbatim.
    #[serde_as(as = "Base64")]
    pub payload: Vec<u8>,
    pub peer: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessMessage {
    pub state: PeerState,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaveMessage {
    pub peer: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PingMessage {
    pub peer: String,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    /// Full document snapshot; merging it brings a joiner up to date.
    #[serde_as(as = "Base64")]
    pub snapshot: Vec<u8>,
    pub peers: Vec<PeerState>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub date: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SaveStateMessage {
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub code: u16,
    pub message: String,
}

/// Frames a connection may send to the server.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "join")]
    Join(JoinMessage),
    #[serde(rename = "update")]
    Update(UpdateMessage),
    #[serde(rename = "awareness")]
    Awareness(AwarenessMessage),
    #[serde(rename = "leave")]
    Leave(LeaveMessage),
    #[serde(rename = "ping")]
    Ping(PingMessage),
}

/// Frames the server sends to connections.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "init")]
    Init(InitMessage),
    #[serde(rename = "update")]
    Update(UpdateMessage),
    #[serde(rename = "awareness")]
    Awareness(AwarenessMessage),
    #[serde(rename = "leave")]
    Leave(LeaveMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
    #[serde(rename = "saveState")]
    SaveState(SaveStateMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

#[cfg(test)]
#[path = "messages_test.rs"]
mod tests;
