use chrono::{DateTime, Duration, Utc};
use loro::VersionVector;
use tracing::{debug, warn};

use crate::client::view::{DiagramView, ViewError};
use crate::config::Config;
use crate::doc::SharedDocStore;
use crate::error::{ReadinessError, SyncDirection};

/// Debounce and retry windows for one synchronization engine.
#[derive(Debug, Clone)]
pub struct SyncTuning {
    /// Coalescing window for local edits before they are pushed.
    pub local_debounce: Duration,
    /// Coalescing window for remote changes before they are applied.
    /// Longer than the local window so local edits win races.
    pub remote_debounce: Duration,
    /// Window after the last local edit during which remote application is
    /// suppressed, so transient remote echoes do not fight the user's
    /// keystrokes.
    pub editing_window: Duration,
    /// Delay between readiness retries for a deferred remote apply.
    pub readiness_retry: Duration,
    /// Readiness retry budget before the apply is surfaced as an error.
    pub readiness_max_retries: u32,
}

impl SyncTuning {
    pub fn from_config(config: &Config) -> Self {
        Self {
            local_debounce: Duration::milliseconds(config.local_debounce_ms as i64),
            remote_debounce: Duration::milliseconds(config.remote_debounce_ms as i64),
            editing_window: Duration::milliseconds(config.editing_window_ms as i64),
            readiness_retry: Duration::milliseconds(config.readiness_retry_ms as i64),
            readiness_max_retries: config.readiness_max_retries,
        }
    }
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// How a local/remote race was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    RemoteWins,
}

/// Record of one settled race, kept for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    pub at: DateTime<Utc>,
    pub strategy: ConflictStrategy,
}

/// Outcomes of a poll pass, consumed by the connection controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A coalesced local change was written to the shared document; the
    /// update must be sent to the room.
    PushedLocal { update: Vec<u8>, at: DateTime<Utc> },
    /// Remote state was applied to the local view.
    AppliedRemote { at: DateTime<Utc> },
    /// First peer in a brand-new room: local content seeded the shared
    /// document; the snapshot must be sent to the room.
    SeededDocument { update: Vec<u8>, at: DateTime<Utc> },
    /// Joined a room with existing content; it was pulled into the view.
    PulledAuthoritative { at: DateTime<Utc> },
    ConflictResolved(ConflictResolution),
    SyncFailed {
        direction: SyncDirection,
        reason: String,
        at: DateTime<Utc>,
    },
}

/// Bidirectional synchronization between the local editable view and the
/// shared CRDT document.
///
/// All timed behavior is driven through `poll(now, ...)`; the engine holds
/// no timers of its own. Only one direction syncs per poll; a change
/// arriving while the other direction is mid-flight stays pending for a
/// later poll rather than being dropped.
pub struct SyncEngine {
    tuning: SyncTuning,
    peer_id: String,
    is_syncing: bool,
    local_pending: bool,
    remote_pending: bool,
    last_local_change_at: Option<DateTime<Utc>>,
    last_remote_change_at: Option<DateTime<Utc>>,
    /// Last content value applied in either direction; guards against
    /// redundant re-application and against echo loops where applying
    /// remote state triggers a local change notification.
    last_synced_content: Option<String>,
    last_synced_version: VersionVector,
    readiness_retries: u32,
    next_remote_attempt_at: Option<DateTime<Utc>>,
    conflict_log: Vec<ConflictResolution>,
}

impl SyncEngine {
    pub fn new(peer_id: &str, tuning: SyncTuning) -> Self {
        Self {
            tuning,
            peer_id: peer_id.to_string(),
            is_syncing: false,
            local_pending: false,
            remote_pending: false,
            last_local_change_at: None,
            last_remote_change_at: None,
            last_synced_content: None,
            last_synced_version: VersionVector::default(),
            readiness_retries: 0,
            next_remote_attempt_at: None,
            conflict_log: Vec::new(),
        }
    }

    /// The user touched the document: arm the local debounce and refresh the
    /// editing window.
    pub fn note_local_edit(&mut self, now: DateTime<Utc>) {
        self.last_local_change_at = Some(now);
        self.local_pending = true;
    }

    /// The shared document changed from a remote origin: arm the remote
    /// debounce.
    pub fn note_remote_change(&mut self, now: DateTime<Utc>) {
        self.last_remote_change_at = Some(now);
        self.remote_pending = true;
    }

    pub fn is_user_editing(&self, now: DateTime<Utc>) -> bool {
        self.last_local_change_at
            .map(|at| now - at < self.tuning.editing_window)
            .unwrap_or(false)
    }

    pub fn conflict_log(&self) -> &[ConflictResolution] {
        &self.conflict_log
    }

    /// Forget room-scoped sync state; used when the session rebinds to a
    /// different room. Identity and tuning survive.
    pub fn reset_room_state(&mut self) {
        self.is_syncing = false;
        self.local_pending = false;
        self.remote_pending = false;
        self.last_local_change_at = None;
        self.last_remote_change_at = None;
        self.last_synced_content = None;
        self.last_synced_version = VersionVector::default();
        self.readiness_retries = 0;
        self.next_remote_attempt_at = None;
        self.conflict_log.clear();
    }

    /// Initial state reconciliation on (re)joining a room.
    ///
    /// Existing shared content is authoritative and is pulled into the view;
    /// an empty shared document is seeded from the local view's content.
    pub fn reconcile_on_join(
        &mut self,
        now: DateTime<Utc>,
        view: &mut dyn DiagramView,
        store: &mut SharedDocStore,
    ) -> Vec<SyncEvent> {
        let mut events = Vec::new();

        if store.has_content() {
            // Keep the pull due immediately if it has to be deferred.
            self.last_remote_change_at = Some(now - self.tuning.remote_debounce);
            if !view.is_ready() {
                events.extend(self.defer_or_fail_remote(now, ViewError::NotReady));
                return events;
            }
            let content = store.content().unwrap_or_default();
            match view.apply_content(&content) {
                Ok(()) => {
                    self.last_synced_content = Some(content);
                    self.last_synced_version = store.version();
                    self.remote_pending = false;
                    events.push(SyncEvent::PulledAuthoritative { at: now });
                }
                Err(ViewError::NotReady) => {
                    events.extend(self.defer_or_fail_remote(now, ViewError::NotReady));
                }
                Err(e) => {
                    events.push(SyncEvent::SyncFailed {
                        direction: SyncDirection::FromRemote,
                        reason: e.to_string(),
                        at: now,
                    });
                }
            }
        } else {
            match view.content() {
                Ok(content) if !content.is_empty() => {
                    store.set_content(&content, &self.peer_id, now);
                    self.last_synced_content = Some(content);
                    self.last_synced_version = store.version();
                    events.push(SyncEvent::SeededDocument {
                        update: store.export_snapshot(),
                        at: now,
                    });
                }
                Ok(_) => {
                    debug!("Joined empty room with empty local view, nothing to seed");
                }
                Err(e) => {
                    events.push(SyncEvent::SyncFailed {
                        direction: SyncDirection::ToRemote,
                        reason: e.to_string(),
                        at: now,
                    });
                }
            }
        }

        events
    }

    /// Drive all timed transitions. Returns the events produced by this
    /// pass; `PushedLocal`/`SeededDocument` carry updates the caller must
    /// transmit.
    pub fn poll(
        &mut self,
        now: DateTime<Utc>,
        view: &mut dyn DiagramView,
        store: &mut SharedDocStore,
    ) -> Vec<SyncEvent> {
        let mut events = Vec::new();

        // Race arbitration: when both directions are pending and the remote
        // change was observed after the last local edit, the remote change
        // wins and the pending local change is discarded.
        if self.local_pending && self.remote_pending {
            if let (Some(local_at), Some(remote_at)) =
                (self.last_local_change_at, self.last_remote_change_at)
            {
                if remote_at > local_at {
                    self.local_pending = false;
                    let resolution = ConflictResolution {
                        at: now,
                        strategy: ConflictStrategy::RemoteWins,
                    };
                    debug!("Discarding pending local change, remote change is newer");
                    self.conflict_log.push(resolution.clone());
                    events.push(SyncEvent::ConflictResolved(resolution));
                }
            }
        }

        if self.local_pending && !self.is_syncing {
            events.extend(self.flush_local(now, view, store));
        }

        if self.remote_pending && !self.is_syncing {
            events.extend(self.apply_remote(now, view, store));
        }

        events
    }

    fn flush_local(
        &mut self,
        now: DateTime<Utc>,
        view: &mut dyn DiagramView,
        store: &mut SharedDocStore,
    ) -> Vec<SyncEvent> {
        let Some(last_local_change_at) = self.last_local_change_at else {
            self.local_pending = false;
            return Vec::new();
        };
        if now - last_local_change_at < self.tuning.local_debounce {
            return Vec::new();
        }

        self.is_syncing = true;
        let mut events = Vec::new();
        match view.content() {
            Ok(content) => {
                // An echo of a remote apply serializes back to the value we
                // just synced; pushing it again would loop.
                if self.last_synced_content.as_deref() != Some(content.as_str()) {
                    store.set_content(&content, &self.peer_id, now);
                    if let Some(update) = store.export_updates_since(&self.last_synced_version) {
                        events.push(SyncEvent::PushedLocal { update, at: now });
                    }
                    self.last_synced_version = store.version();
                    self.last_synced_content = Some(content);
                }
                self.local_pending = false;
            }
            Err(e) => {
                warn!("Reading local view for push failed: {}", e);
                self.local_pending = false;
                events.push(SyncEvent::SyncFailed {
                    direction: SyncDirection::ToRemote,
                    reason: e.to_string(),
                    at: now,
                });
            }
        }
        self.is_syncing = false;
        events
    }

    fn apply_remote(
        &mut self,
        now: DateTime<Utc>,
        view: &mut dyn DiagramView,
        store: &mut SharedDocStore,
    ) -> Vec<SyncEvent> {
        let Some(last_remote_change_at) = self.last_remote_change_at else {
            self.remote_pending = false;
            return Vec::new();
        };
        if now - last_remote_change_at < self.tuning.remote_debounce {
            return Vec::new();
        }
        // Never clobber in-progress user input.
        if self.is_user_editing(now) || self.local_pending {
            return Vec::new();
        }
        if let Some(next_attempt_at) = self.next_remote_attempt_at {
            if now < next_attempt_at {
                return Vec::new();
            }
        }

        self.is_syncing = true;
        let mut events = Vec::new();
        if !view.is_ready() {
            events.extend(self.defer_or_fail_remote(now, ViewError::NotReady));
        } else {
            self.readiness_retries = 0;
            self.next_remote_attempt_at = None;
            match store.content() {
                Some(content) => {
                    if self.last_synced_content.as_deref() == Some(content.as_str()) {
                        // Byte-identical to what is already applied.
                        self.remote_pending = false;
                    } else {
                        match view.apply_content(&content) {
                            Ok(()) => {
                                self.last_synced_content = Some(content);
                                self.last_synced_version = store.version();
                                self.remote_pending = false;
                                events.push(SyncEvent::AppliedRemote { at: now });
                            }
                            Err(ViewError::NotReady) => {
                                events.extend(
                                    self.defer_or_fail_remote(now, ViewError::NotReady),
                                );
                            }
                            Err(e) => {
                                warn!("Applying remote state failed: {}", e);
                                self.remote_pending = false;
                                events.push(SyncEvent::SyncFailed {
                                    direction: SyncDirection::FromRemote,
                                    reason: e.to_string(),
                                    at: now,
                                });
                            }
                        }
                    }
                }
                None => {
                    self.remote_pending = false;
                }
            }
        }
        self.is_syncing = false;
        events
    }

    /// Schedule another readiness attempt, or give up once the budget is
    /// exhausted and surface the failure instead of retrying forever.
    fn defer_or_fail_remote(&mut self, now: DateTime<Utc>, _error: ViewError) -> Vec<SyncEvent> {
        self.readiness_retries += 1;
        if self.readiness_retries > self.tuning.readiness_max_retries {
            let failure = ReadinessError {
                attempts: self.readiness_retries,
            };
            self.readiness_retries = 0;
            self.next_remote_attempt_at = None;
            self.remote_pending = false;
            warn!("{}", failure);
            vec![SyncEvent::SyncFailed {
                direction: SyncDirection::FromRemote,
                reason: failure.to_string(),
                at: now,
            }]
        } else {
            self.remote_pending = true;
            self.next_remote_attempt_at = Some(now + self.tuning.readiness_retry);
            Vec::new()
        }
    }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
