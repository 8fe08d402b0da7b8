use super::*;

use chrono::TimeZone;
use loro::VersionVector;

fn ts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

struct TestView {
    ready: bool,
    content: String,
    applied: Vec<String>,
}

impl TestView {
    fn new(content: &str) -> Self {
        Self {
            ready: true,
            content: content.to_string(),
            applied: Vec::new(),
        }
    }

    fn not_ready(content: &str) -> Self {
        Self {
            ready: false,
            ..Self::new(content)
        }
    }
}

impl DiagramView for TestView {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn content(&self) -> Result<String, ViewError> {
        Ok(self.content.clone())
    }

    fn apply_content(&mut self, content: &str) -> Result<(), ViewError> {
        if !self.ready {
            return Err(ViewError::NotReady);
        }
        self.content = content.to_string();
        self.applied.push(content.to_string());
        Ok(())
    }
}

fn remote_update(content: &str, peer: &str, at_ms: i64) -> Vec<u8> {
    let mut source = SharedDocStore::new();
    source.set_content(content, peer, ts(at_ms));
    source
        .export_updates_since(&VersionVector::default())
        .unwrap()
}

fn engine() -> SyncEngine {
    SyncEngine::new("local-peer", SyncTuning::default())
}

fn pushed(events: &[SyncEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SyncEvent::PushedLocal { .. }))
        .count()
}

#[test]
fn burst_of_local_edits_produces_exactly_one_push() {
    let mut engine = engine();
    let mut view = TestView::new("<v1/>");
    let mut store = SharedDocStore::new();

    let mut all_events = Vec::new();
    for at in [0, 30, 60, 90] {
        engine.note_local_edit(ts(at));
        all_events.extend(engine.poll(ts(at), &mut view, &mut store));
    }
    // quiet: the debounce window elapses after the last edit
    all_events.extend(engine.poll(ts(250), &mut view, &mut store));

    assert_eq!(pushed(&all_events), 1);
    assert_eq!(store.content().as_deref(), Some("<v1/>"));
    assert_eq!(store.last_modified_by().as_deref(), Some("local-peer"));
}

#[test]
fn push_is_skipped_while_the_debounce_window_is_open() {
    let mut engine = engine();
    let mut view = TestView::new("<v1/>");
    let mut store = SharedDocStore::new();

    engine.note_local_edit(ts(0));
    let events = engine.poll(ts(50), &mut view, &mut store);
    assert!(events.is_empty());
    assert_eq!(store.content(), None);
}

#[test]
fn newer_remote_change_wins_over_pending_local_change() {
    let mut engine = engine();
    let mut view = TestView::new("<local/>");
    let mut store = SharedDocStore::new();

    // local pending at T1=1000ms, not yet flushed
    engine.note_local_edit(ts(1_000));

    // remote change observed at T2=1500ms
    store.merge(&remote_update("<remote/>", "other", 1_500)).unwrap();
    engine.note_remote_change(ts(1_500));

    // first poll happens after the editing window has passed
    let events = engine.poll(ts(5_000), &mut view, &mut store);

    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::ConflictResolved(r) if r.strategy == ConflictStrategy::RemoteWins)));
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::AppliedRemote { .. })));
    assert_eq!(pushed(&events), 0);
    assert_eq!(view.content, "<remote/>");
    assert_eq!(engine.conflict_log().len(), 1);
}

#[test]
fn older_remote_change_does_not_discard_local_edit() {
    let mut engine = engine();
    let mut view = TestView::new("<local/>");
    let mut store = SharedDocStore::new();

    store.merge(&remote_update("<remote/>", "other", 500)).unwrap();
    engine.note_remote_change(ts(500));
    engine.note_local_edit(ts(1_000));

    let events = engine.poll(ts(5_000), &mut view, &mut store);

    assert!(!events
        .iter()
        .any(|e| matches!(e, SyncEvent::ConflictResolved(_))));
    assert_eq!(pushed(&events), 1);
    assert_eq!(store.content().as_deref(), Some("<local/>"));
}

#[test]
fn joining_empty_room_seeds_shared_document_from_local_view() {
    let mut engine = engine();
    let mut view = TestView::new("<seed/>");
    let mut store = SharedDocStore::new();

    let events = engine.reconcile_on_join(ts(0), &mut view, &mut store);

    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::SeededDocument { .. })));
    assert_eq!(store.content().as_deref(), Some("<seed/>"));
    // nothing was applied back into the view
    assert!(view.applied.is_empty());
}

#[test]
fn joining_existing_room_pulls_authoritative_content() {
    let mut engine = engine();
    let mut view = TestView::new("<stale/>");
    let mut store = SharedDocStore::new();
    store.merge(&remote_update("<existing/>", "other", 100)).unwrap();

    let events = engine.reconcile_on_join(ts(1_000), &mut view, &mut store);

    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::PulledAuthoritative { .. })));
    assert_eq!(view.content, "<existing/>");
    assert_eq!(store.content().as_deref(), Some("<existing/>"));
}

#[test]
fn identical_remote_content_is_not_reapplied() {
    let mut engine = engine();
    let mut view = TestView::new("<stale/>");
    let mut store = SharedDocStore::new();
    store.merge(&remote_update("<same/>", "other", 0)).unwrap();
    engine.reconcile_on_join(ts(0), &mut view, &mut store);
    assert_eq!(view.applied.len(), 1);

    // a duplicate of the same update arrives later
    store.merge(&remote_update("<same/>", "other", 0)).unwrap();
    engine.note_remote_change(ts(10_000));
    let events = engine.poll(ts(20_000), &mut view, &mut store);

    assert!(!events
        .iter()
        .any(|e| matches!(e, SyncEvent::AppliedRemote { .. })));
    assert_eq!(view.applied.len(), 1);
}

#[test]
fn remote_apply_is_suppressed_while_user_is_editing() {
    let mut engine = engine();
    let mut view = TestView::new("<stale/>");
    let mut store = SharedDocStore::new();

    // one remote peer editing over time: the second update supersedes the first
    let mut source = SharedDocStore::new();
    source.set_content("<existing/>", "other", ts(0));
    let first = source
        .export_updates_since(&VersionVector::default())
        .unwrap();
    let seen = source.version();
    source.set_content("<remote/>", "other", ts(1_500));
    let second = source.export_updates_since(&seen).unwrap();

    store.merge(&first).unwrap();
    engine.reconcile_on_join(ts(0), &mut view, &mut store);

    // the user is actively working (content unchanged, window armed)
    engine.note_local_edit(ts(1_100));

    // a remote change lands while they type
    store.merge(&second).unwrap();
    engine.note_remote_change(ts(1_500));

    let events = engine.poll(ts(2_600), &mut view, &mut store);
    assert!(!events
        .iter()
        .any(|e| matches!(e, SyncEvent::AppliedRemote { .. })));
    assert_eq!(view.content, "<existing/>");

    // once the user goes quiet, the deferred change lands
    let events = engine.poll(ts(6_000), &mut view, &mut store);
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::AppliedRemote { .. })));
    assert_eq!(view.content, "<remote/>");
}

#[test]
fn readiness_retries_are_bounded_and_then_surfaced() {
    let tuning = SyncTuning {
        readiness_max_retries: 2,
        ..SyncTuning::default()
    };
    let mut engine = SyncEngine::new("local-peer", tuning);
    let mut view = TestView::not_ready("<local/>");
    let mut store = SharedDocStore::new();

    let mut source = SharedDocStore::new();
    source.set_content("<remote/>", "other", ts(0));
    let first = source
        .export_updates_since(&VersionVector::default())
        .unwrap();
    let seen = source.version();
    source.set_content("<later/>", "other", ts(50_000));
    let second = source.export_updates_since(&seen).unwrap();

    store.merge(&first).unwrap();
    engine.note_remote_change(ts(0));

    let mut failed = Vec::new();
    let mut at = 1_000;
    for _ in 0..5 {
        at += 1_000;
        failed.extend(
            engine
                .poll(ts(at), &mut view, &mut store)
                .into_iter()
                .filter(|e| matches!(e, SyncEvent::SyncFailed { .. })),
        );
    }

    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0],
        SyncEvent::SyncFailed {
            direction: SyncDirection::FromRemote,
            ..
        }
    ));
    assert!(view.applied.is_empty());

    // once ready again, later remote changes still flow
    view.ready = true;
    store.merge(&second).unwrap();
    engine.note_remote_change(ts(50_000));
    let events = engine.poll(ts(60_000), &mut view, &mut store);
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::AppliedRemote { .. })));
}

#[test]
fn echo_of_applied_remote_state_is_not_pushed_back() {
    let mut engine = engine();
    let mut view = TestView::new("<local/>");
    let mut store = SharedDocStore::new();

    store.merge(&remote_update("<remote/>", "other", 0)).unwrap();
    engine.note_remote_change(ts(0));
    let events = engine.poll(ts(5_000), &mut view, &mut store);
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::AppliedRemote { .. })));

    // the editor fires a change event for the import we just did
    engine.note_local_edit(ts(5_010));
    let events = engine.poll(ts(9_000), &mut view, &mut store);
    assert_eq!(pushed(&events), 0);
}

#[test]
fn reset_room_state_clears_pending_work() {
    let mut engine = engine();
    let mut view = TestView::new("<local/>");
    let mut store = SharedDocStore::new();

    engine.note_local_edit(ts(0));
    engine.reset_room_state();

    let events = engine.poll(ts(1_000), &mut view, &mut store);
    assert!(events.is_empty());
    assert_eq!(store.content(), None);
}
