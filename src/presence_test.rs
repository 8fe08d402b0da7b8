use super::*;

use chrono::TimeZone;

use crate::models::presence::CursorRef;

fn ts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn peer(id: &str, at: i64) -> PeerState {
    PeerState {
        peer_id: id.to_string(),
        display_name: format!("User {}", id),
        color: "#ff8800".to_string(),
        cursor: None,
        last_seen: ts(at),
    }
}

#[test]
fn apply_remote_reports_added_then_updated() {
    let mut channel = PresenceChannel::new(30_000);

    let delta = channel.apply_remote(peer("p1", 1_000));
    assert_eq!(delta.added.len(), 1);
    assert!(delta.updated.is_empty());

    let delta = channel.apply_remote(peer("p1", 2_000));
    assert!(delta.added.is_empty());
    assert_eq!(delta.updated.len(), 1);
    assert_eq!(channel.len(), 1);
}

#[test]
fn silent_peer_is_expired_after_timeout() {
    let mut channel = PresenceChannel::new(30_000);
    channel.apply_remote(peer("quiet", 0));
    channel.apply_remote(peer("chatty", 0));

    // chatty keeps pinging, quiet does not
    channel.touch("chatty", ts(25_000));

    let delta = channel.purge_expired(ts(31_000));
    assert_eq!(delta.removed, vec!["quiet".to_string()]);
    assert!(channel.states().contains_key("chatty"));
    assert!(!channel.states().contains_key("quiet"));
}

#[test]
fn peer_within_timeout_is_kept() {
    let mut channel = PresenceChannel::new(30_000);
    channel.apply_remote(peer("p1", 10_000));

    let delta = channel.purge_expired(ts(39_000));
    assert!(delta.removed.is_empty());
    assert_eq!(channel.len(), 1);
}

#[test]
fn remove_is_idempotent() {
    let mut channel = PresenceChannel::new(30_000);
    channel.apply_remote(peer("p1", 0));

    let delta = channel.remove("p1");
    assert_eq!(delta.removed.len(), 1);

    let delta = channel.remove("p1");
    assert!(delta.is_empty());
}

#[test]
fn local_cursor_update_keeps_identity() {
    let mut channel = PresenceChannel::new(30_000);
    channel.set_local_state(peer("me", 0), ts(0));

    let state = channel
        .set_local_cursor(Some(CursorRef::Element {
            element_id: "Task_1".to_string(),
        }), ts(500))
        .unwrap();

    assert_eq!(state.display_name, "User me");
    assert_eq!(state.last_seen, ts(500));
    assert!(matches!(state.cursor, Some(CursorRef::Element { .. })));
}

#[test]
fn local_cursor_without_local_state_is_none() {
    let mut channel = PresenceChannel::new(30_000);
    assert!(channel.set_local_cursor(None, ts(0)).is_none());
}
