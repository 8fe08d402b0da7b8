use super::*;

use chrono::TimeZone;

use crate::models::presence::CursorRef;

#[test]
fn join_frame_round_trips() {
    let json = r##"{"type":"join","roomId":"diagram-7","peer":{"peerId":"p1","displayName":"Ada","color":"#ff0000"}}"##;
    let parsed: ReceivedMessage = serde_json::from_str(json).unwrap();
    match &parsed {
        ReceivedMessage::Join(join) => {
            assert_eq!(join.room_id, "diagram-7");
            assert_eq!(join.document_id, None);
            assert_eq!(join.peer.display_name, "Ada");
        }
        other => panic!("unexpected frame: {:?}", other),
    }

    let reencoded = serde_json::to_string(&parsed).unwrap();
    assert!(reencoded.contains("\"type\":\"join\""));
    assert!(reencoded.contains("\"roomId\":\"diagram-7\""));
}

#[test]
fn update_payload_is_base64_on_the_wire() {
    let msg = ReceivedMessage::Update(UpdateMessage {
        payload: vec![0x01, 0x02, 0xff],
        peer: "p1".to_string(),
        sent_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
    });
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"payload\":\"AQL/\""));

    let back: ReceivedMessage = serde_json::from_str(&json).unwrap();
    match back {
        ReceivedMessage::Update(update) => assert_eq!(update.payload, vec![0x01, 0x02, 0xff]),
        other => panic!("unexpected frame: {:?}", other),
    }
}

#[test]
fn awareness_frame_carries_cursor_variants() {
    let state = PeerState {
        peer_id: "p2".to_string(),
        display_name: "Grace".to_string(),
        color: "#00ff00".to_string(),
        cursor: Some(CursorRef::Element {
            element_id: "Gateway_3".to_string(),
        }),
        last_seen: Utc.timestamp_millis_opt(0).unwrap(),
    };
    let json = serde_json::to_string(&SendMessage::Awareness(AwarenessMessage {
        state,
    }))
    .unwrap();
    assert!(json.contains("\"kind\":\"element\""));
    assert!(json.contains("\"elementId\":\"Gateway_3\""));

    let point = serde_json::to_string(&CursorRef::Point { x: 12.5, y: -3.0 }).unwrap();
    assert!(point.contains("\"kind\":\"point\""));
}

#[test]
fn unknown_frame_type_fails_to_parse() {
    let err = serde_json::from_str::<ReceivedMessage>(r#"{"type":"shutdown"}"#);
    assert!(err.is_err());
}

#[test]
fn save_state_omits_empty_message() {
    let json = serde_json::to_string(&SendMessage::SaveState(SaveStateMessage {
        degraded: true,
        message: None,
    }))
    .unwrap();
    assert_eq!(json, r#"{"type":"saveState","degraded":true}"#);
}
