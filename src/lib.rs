//! Real-time collaboration engine for diagram documents.
//!
//! One room per document: peers join over WebSocket, edits travel as opaque
//! CRDT updates and merge conflict-free on every replica, presence is
//! broadcast ephemerally, and the server persists room documents on a
//! debounce/ceiling policy. The client half owns a local editable view,
//! debounces local edits against incoming remote changes and reconciles
//! state on every (re)join.

pub mod client;
pub mod clock;
pub mod config;
pub mod db;
pub mod doc;
pub mod error;
pub mod handlers;
pub mod models;
pub mod presence;
pub mod routes;
pub mod server;
