use super::*;

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::models::messages::{JoinMessage, PingMessage, ReceivedMessage};
use crate::models::presence::PeerIdentity;
use crate::routes::api::create_routes;
use crate::server::persist::MemoryRepository;

async fn start_server() -> String {
    let registry = Arc::new(crate::server::room::RoomRegistry::new(
        &Config::default(),
        Arc::new(MemoryRepository::new()),
        Arc::new(SystemClock),
    ));
    let router = create_routes(registry);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("ws://{}/ws", addr)
}

async fn next_frame<S>(ws: &mut S) -> Option<SendMessage>
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")?;
    match frame.ok()? {
        WsMessage::Text(text) => serde_json::from_str(text.as_str()).ok(),
        _ => None,
    }
}

fn join_frame(room_id: &str) -> String {
    serde_json::to_string(&ReceivedMessage::Join(JoinMessage {
        room_id: room_id.to_string(),
        document_id: None,
        peer: PeerIdentity {
            peer_id: "raw-peer".to_string(),
            display_name: "Raw".to_string(),
            color: "#123456".to_string(),
        },
    }))
    .unwrap()
}

#[tokio::test]
async fn join_without_room_id_is_rejected_and_connection_closed() {
    let url = start_server().await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    ws.send(WsMessage::Text(join_frame("  ").into()))
        .await
        .unwrap();

    match next_frame(&mut ws).await {
        Some(SendMessage::Error(err)) => assert_eq!(err.code, 400),
        other => panic!("expected error frame, got {:?}", other),
    }

    // the server tears the connection down after the rejection
    let end = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                _ => continue,
            }
        }
    })
    .await;
    assert!(end.is_ok());
}

#[tokio::test]
async fn update_before_join_is_refused() {
    let url = start_server().await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    let update = serde_json::to_string(&ReceivedMessage::Update(
        crate::models::messages::UpdateMessage {
            payload: vec![1, 2, 3],
            peer: "raw-peer".to_string(),
            sent_at: Utc::now(),
        },
    ))
    .unwrap();
    ws.send(WsMessage::Text(update.into())).await.unwrap();

    match next_frame(&mut ws).await {
        Some(SendMessage::Error(err)) => assert_eq!(err.code, 409),
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[tokio::test]
async fn join_gets_init_and_ping_gets_pong() {
    let url = start_server().await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    ws.send(WsMessage::Text(join_frame("room-raw").into()))
        .await
        .unwrap();

    match next_frame(&mut ws).await {
        Some(SendMessage::Init(init)) => {
            assert!(!init.snapshot.is_empty());
            assert_eq!(init.peers.len(), 1);
            assert_eq!(init.peers[0].peer_id, "raw-peer");
        }
        other => panic!("expected init frame, got {:?}", other),
    }

    let ping = serde_json::to_string(&ReceivedMessage::Ping(PingMessage {
        peer: "raw-peer".to_string(),
    }))
    .unwrap();
    ws.send(WsMessage::Text(ping.into())).await.unwrap();

    match next_frame(&mut ws).await {
        Some(SendMessage::Pong(_)) => {}
        other => panic!("expected pong frame, got {:?}", other),
    }
}
