use std::borrow::Cow;

use chrono::{DateTime, Utc};
use loro::{ExportMode, LoroDoc, ToJson, VersionVector};
use tracing::warn;

use crate::error::MergeError;

/// Origin of a document mutation as seen by this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// Typed observer for shared-document mutations. Invoked once per successful
/// `set_content` or `merge`, with the origin and the content value after the
/// mutation.
pub trait DocumentSyncObserver: Send {
    fn document_changed(&mut self, origin: ChangeOrigin, content: Option<&str>);
}

const DOC_MAP: &str = "document";
const KEY_CONTENT: &str = "content";
const KEY_MODIFIED_AT: &str = "lastModifiedAt";
const KEY_MODIFIED_BY: &str = "lastModifiedBy";

/// CRDT-backed shared document for one room.
///
/// Holds a `document` map with the serialized diagram (`content`) and the
/// last-writer metadata. Merges from any two divergent replicas converge to
/// the same value given the same set of updates, regardless of arrival order;
/// duplicate delivery is a no-op at the CRDT layer.
pub struct SharedDocStore {
    doc: LoroDoc,
    observers: Vec<Box<dyn DocumentSyncObserver>>,
}

impl SharedDocStore {
    pub fn new() -> Self {
        Self {
            doc: LoroDoc::new(),
            observers: Vec::new(),
        }
    }

    /// Restore a store from a previously exported snapshot.
    pub fn from_snapshot(snapshot: &[u8]) -> Result<Self, MergeError> {
        let doc = LoroDoc::new();
        doc.import(snapshot).map_err(|e| MergeError {
            reason: e.to_string(),
        })?;
        Ok(Self {
            doc,
            observers: Vec::new(),
        })
    }

    pub fn observe(&mut self, observer: Box<dyn DocumentSyncObserver>) {
        self.observers.push(observer);
    }

    /// Read a key from the document map.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let value = self.doc.get_deep_value().to_json_value();
        value.get(DOC_MAP)?.get(key).cloned()
    }

    pub fn content(&self) -> Option<String> {
        self.get(KEY_CONTENT)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    pub fn last_modified_at(&self) -> Option<i64> {
        self.get(KEY_MODIFIED_AT).and_then(|v| v.as_i64())
    }

    pub fn last_modified_by(&self) -> Option<String> {
        self.get(KEY_MODIFIED_BY)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    pub fn has_content(&self) -> bool {
        self.content().map(|c| !c.is_empty()).unwrap_or(false)
    }

    /// Write one key in the document map. Fires the observer set once with
    /// `ChangeOrigin::Local`.
    pub fn set<V: Into<loro::LoroValue>>(&mut self, key: &str, value: V) {
        let map = self.doc.get_map(DOC_MAP);
        let _ = map.insert(key, value);
        self.notify(ChangeOrigin::Local);
    }

    /// Replace the document content, annotated with the writing peer and a
    /// timestamp. Fires the observer set once with `ChangeOrigin::Local`.
    pub fn set_content(&mut self, content: &str, peer: &str, at: DateTime<Utc>) {
        let map = self.doc.get_map(DOC_MAP);
        let _ = map.insert(KEY_CONTENT, content);
        let _ = map.insert(KEY_MODIFIED_AT, at.timestamp_millis());
        let _ = map.insert(KEY_MODIFIED_BY, peer);
        self.notify(ChangeOrigin::Local);
    }

    /// Apply a serialized update produced by a peer. Malformed payloads are
    /// rejected without touching existing state. Fires the observer set once
    /// with `ChangeOrigin::Remote` on success.
    pub fn merge(&mut self, update: &[u8]) -> Result<(), MergeError> {
        if let Err(e) = self.doc.import(update) {
            warn!("Rejected malformed document update: {}", e);
            return Err(MergeError {
                reason: e.to_string(),
            });
        }
        self.notify(ChangeOrigin::Remote);
        Ok(())
    }

    /// Export the full document state.
    pub fn export_snapshot(&self) -> Vec<u8> {
        self.doc
            .export(ExportMode::Snapshot)
            .expect("snapshot export should not fail")
    }

    /// Export updates made since the given version, or `None` when the
    /// document has not advanced.
    pub fn export_updates_since(&self, version: &VersionVector) -> Option<Vec<u8>> {
        let current_vv = self.doc.oplog_vv();
        if *version == current_vv {
            return None;
        }

        let updates = self
            .doc
            .export(ExportMode::Updates {
                from: Cow::Owned(version.clone()),
            })
            .ok()?;

        if updates.is_empty() {
            return None;
        }
        Some(updates)
    }

    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }

    fn notify(&mut self, origin: ChangeOrigin) {
        let content = {
            let value = self.doc.get_deep_value().to_json_value();
            value
                .get(DOC_MAP)
                .and_then(|m| m.get(KEY_CONTENT))
                .and_then(|v| v.as_str().map(|s| s.to_string()))
        };
        for observer in &mut self.observers {
            observer.document_changed(origin, content.as_deref());
        }
    }
}

impl Default for SharedDocStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
