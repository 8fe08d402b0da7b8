use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::error::PersistError;

/// Durable form of a room document. The snapshot restores full CRDT history;
/// the plain content column seeds a fresh document when no snapshot exists
/// yet (e.g. rows created by an external import).
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub snapshot: Option<Vec<u8>>,
    pub content: Option<String>,
}

pub type LoadFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<StoredDocument>, PersistError>> + Send + 'a>>;
pub type SaveFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + 'a>>;

/// Durable-storage boundary consumed by the room registry.
///
/// `load_document` runs on first room creation, before any client update is
/// accepted; `save_document` runs per the debounce/ceiling policy.
pub trait DocumentRepository: Send + Sync {
    fn load_document(&self, document_id: Uuid) -> LoadFuture<'_>;

    fn save_document(
        &self,
        document_id: Uuid,
        snapshot: Vec<u8>,
        content: Option<String>,
        last_modified_by: Option<String>,
    ) -> SaveFuture<'_>;
}

/// In-memory repository for tests and db-less operation.
#[derive(Default)]
pub struct MemoryRepository {
    documents: Mutex<HashMap<Uuid, StoredDocument>>,
    fail_saves: Mutex<bool>,
    save_count: Mutex<u64>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail, for exercising the retry/degraded path.
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }

    pub fn save_count(&self) -> u64 {
        *self.save_count.lock().unwrap()
    }

    pub fn stored(&self, document_id: Uuid) -> Option<StoredDocument> {
        self.documents.lock().unwrap().get(&document_id).cloned()
    }

    pub fn seed(&self, document_id: Uuid, document: StoredDocument) {
        self.documents.lock().unwrap().insert(document_id, document);
    }
}

impl DocumentRepository for MemoryRepository {
    fn load_document(&self, document_id: Uuid) -> LoadFuture<'_> {
        let result = self.documents.lock().unwrap().get(&document_id).cloned();
        Box::pin(async move { Ok(result) })
    }

    fn save_document(
        &self,
        document_id: Uuid,
        snapshot: Vec<u8>,
        content: Option<String>,
        _last_modified_by: Option<String>,
    ) -> SaveFuture<'_> {
        let fail = *self.fail_saves.lock().unwrap();
        if !fail {
            *self.save_count.lock().unwrap() += 1;
            self.documents.lock().unwrap().insert(
                document_id,
                StoredDocument {
                    snapshot: Some(snapshot),
                    content,
                },
            );
        }
        Box::pin(async move {
            if fail {
                Err(PersistError::Unavailable("simulated failure".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

/// Tuning for the write scheduler.
#[derive(Debug, Clone)]
pub struct PersistPolicy {
    pub debounce: Duration,
    pub ceiling: Duration,
    pub retry_base: Duration,
    pub max_retries: u32,
}

impl PersistPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: Duration::milliseconds(config.persist_debounce_ms as i64),
            ceiling: Duration::milliseconds(config.persist_ceiling_ms as i64),
            retry_base: Duration::milliseconds(config.persist_retry_base_ms as i64),
            max_retries: config.persist_max_retries,
        }
    }
}

/// Outcome of recording a failed write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still within the retry budget; a retry is scheduled.
    Retrying,
    /// The retry ceiling was just crossed; signal degraded mode once.
    EnteredDegraded,
    /// Already degraded; keep retrying in the background.
    StillDegraded,
}

/// Per-room write scheduling state.
///
/// Writes are not synchronous per update: bursts of edits coalesce into one
/// write after a quiet period, and a maximum-delay ceiling forces a write
/// under continuous editing so data loss on crash stays bounded.
#[derive(Debug, Default)]
pub struct PersistSchedule {
    dirty_since: Option<DateTime<Utc>>,
    last_change_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    failures: u32,
    degraded: bool,
}

impl PersistSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self, now: DateTime<Utc>) {
        if self.dirty_since.is_none() {
            self.dirty_since = Some(now);
        }
        self.last_change_at = Some(now);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether a write should happen now: the room is dirty, any retry
    /// backoff has elapsed, and either the quiet period or the ceiling has
    /// been reached.
    pub fn should_flush(&self, now: DateTime<Utc>, policy: &PersistPolicy) -> bool {
        let (Some(dirty_since), Some(last_change_at)) = (self.dirty_since, self.last_change_at)
        else {
            return false;
        };
        if let Some(next_attempt_at) = self.next_attempt_at {
            if now < next_attempt_at {
                return false;
            }
        }
        now - last_change_at >= policy.debounce || now - dirty_since >= policy.ceiling
    }

    /// Whether a write may be attempted now, ignoring the quiet period.
    /// Used for the final flush on room teardown, which still honors retry
    /// backoff.
    pub fn should_attempt(&self, now: DateTime<Utc>) -> bool {
        if self.dirty_since.is_none() {
            return false;
        }
        match self.next_attempt_at {
            Some(next_attempt_at) => now >= next_attempt_at,
            None => true,
        }
    }

    /// Record a successful write. Returns true when this write cleared a
    /// degraded state.
    pub fn record_success(&mut self) -> bool {
        self.dirty_since = None;
        self.last_change_at = None;
        self.next_attempt_at = None;
        self.failures = 0;
        let was_degraded = self.degraded;
        self.degraded = false;
        was_degraded
    }

    /// Record a failed write and schedule the next attempt with exponential
    /// backoff. The room stays dirty; relay is never blocked on this.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        policy: &PersistPolicy,
    ) -> FailureOutcome {
        self.failures += 1;
        let shift = std::cmp::min(self.failures.saturating_sub(1), 6);
        let delay = policy.retry_base * (1 << shift);
        self.next_attempt_at = Some(now + delay);

        if self.failures >= policy.max_retries {
            if self.degraded {
                FailureOutcome::StillDegraded
            } else {
                self.degraded = true;
                FailureOutcome::EnteredDegraded
            }
        } else {
            FailureOutcome::Retrying
        }
    }
}

#[cfg(test)]
#[path = "persist_test.rs"]
mod tests;
