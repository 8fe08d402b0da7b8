use super::*;

use chrono::TimeZone;

fn ts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn policy() -> PersistPolicy {
    PersistPolicy {
        debounce: Duration::milliseconds(5_000),
        ceiling: Duration::milliseconds(60_000),
        retry_base: Duration::milliseconds(500),
        max_retries: 3,
    }
}

#[test]
fn clean_schedule_never_flushes() {
    let schedule = PersistSchedule::new();
    assert!(!schedule.should_flush(ts(1_000_000), &policy()));
}

#[test]
fn flush_waits_for_quiet_period() {
    let mut schedule = PersistSchedule::new();
    schedule.mark_dirty(ts(0));
    schedule.mark_dirty(ts(2_000));

    // 4s after the last edit: still inside the debounce window
    assert!(!schedule.should_flush(ts(6_000), &policy()));
    // 5s after the last edit: quiet period elapsed
    assert!(schedule.should_flush(ts(7_000), &policy()));
}

#[test]
fn ceiling_forces_flush_under_continuous_editing() {
    let mut schedule = PersistSchedule::new();
    // an edit every second, forever: the debounce window never elapses
    for ms in (0..=60_000).step_by(1_000) {
        schedule.mark_dirty(ts(ms));
    }
    assert!(schedule.should_flush(ts(60_000), &policy()));
}

#[test]
fn success_clears_dirty_state() {
    let mut schedule = PersistSchedule::new();
    schedule.mark_dirty(ts(0));
    let cleared_degraded = schedule.record_success();
    assert!(!cleared_degraded);
    assert!(!schedule.is_dirty());
    assert!(!schedule.should_flush(ts(100_000), &policy()));
}

#[test]
fn failures_back_off_exponentially_and_degrade_once() {
    let mut schedule = PersistSchedule::new();
    schedule.mark_dirty(ts(0));

    assert_eq!(schedule.record_failure(ts(10_000), &policy()), FailureOutcome::Retrying);
    // backoff 500ms: too early at +200ms, due at +500ms
    assert!(!schedule.should_flush(ts(10_200), &policy()));
    assert!(schedule.should_flush(ts(10_500), &policy()));

    assert_eq!(schedule.record_failure(ts(10_500), &policy()), FailureOutcome::Retrying);
    // backoff doubled to 1s
    assert!(!schedule.should_flush(ts(11_000), &policy()));
    assert!(schedule.should_flush(ts(11_500), &policy()));

    assert_eq!(
        schedule.record_failure(ts(11_500), &policy()),
        FailureOutcome::EnteredDegraded
    );
    assert!(schedule.is_degraded());
    assert_eq!(
        schedule.record_failure(ts(20_000), &policy()),
        FailureOutcome::StillDegraded
    );

    // a late success clears the degraded flag and reports the transition
    assert!(schedule.record_success());
    assert!(!schedule.is_degraded());
}

#[test]
fn room_stays_dirty_across_failures() {
    let mut schedule = PersistSchedule::new();
    schedule.mark_dirty(ts(0));
    schedule.record_failure(ts(6_000), &policy());
    assert!(schedule.is_dirty());
}

#[tokio::test]
async fn memory_repository_round_trips() {
    let repo = MemoryRepository::new();
    let id = Uuid::new_v4();

    assert!(repo.load_document(id).await.unwrap().is_none());

    repo.save_document(id, vec![1, 2, 3], Some("<doc/>".to_string()), None)
        .await
        .unwrap();

    let stored = repo.load_document(id).await.unwrap().unwrap();
    assert_eq!(stored.snapshot.as_deref(), Some(&[1u8, 2, 3][..]));
    assert_eq!(stored.content.as_deref(), Some("<doc/>"));
    assert_eq!(repo.save_count(), 1);
}

#[tokio::test]
async fn memory_repository_simulated_failure() {
    let repo = MemoryRepository::new();
    repo.set_fail_saves(true);
    let err = repo
        .save_document(Uuid::new_v4(), vec![], None, None)
        .await;
    assert!(err.is_err());
    assert_eq!(repo.save_count(), 0);
}
