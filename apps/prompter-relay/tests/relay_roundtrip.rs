//! Wire-level relay behavior, driven by plain tokio-tungstenite
//! clients against a relay on an ephemeral port.

use futures_util::{SinkExt, StreamExt};
use prompter_proto::{now_millis, Role, SyncMessage};
use prompter_relay::relay::RelayState;
use prompter_relay::relay_router;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay(access_key: Option<&str>) -> SocketAddr {
    let state = RelayState::new(access_key.map(str::to_string));
    let app = relay_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind relay listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("relay serve");
    });
    addr
}

async fn connect(addr: SocketAddr, key: Option<&str>) -> WsClient {
    let url = match key {
        Some(key) => format!("ws://{addr}/ws?key={key}"),
        None => format!("ws://{addr}/ws"),
    };
    let (stream, _) = connect_async(&url).await.expect("connect to relay");
    stream
}

async fn next_message(ws: &mut WsClient) -> SyncMessage {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("valid sync message");
        }
    }
}

async fn expect_silence(ws: &mut WsClient) {
    let got = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(got.is_err(), "expected no frame, got {got:?}");
}

fn state_update(device_id: &str, value: i64) -> String {
    serde_json::to_string(&SyncMessage::StateUpdate {
        timestamp: now_millis(),
        device_id: device_id.to_string(),
        key: "teleprompter-state".to_string(),
        data: json!(value),
        role: Role::Host,
    })
    .expect("serialize")
}

#[tokio::test]
async fn greets_each_client_with_identity_and_peer_count() {
    let addr = start_relay(None).await;

    let mut a = connect(addr, None).await;
    match next_message(&mut a).await {
        SyncMessage::Connected {
            device_id,
            total_clients,
            ..
        } => {
            assert!(device_id.starts_with("client-"));
            assert_eq!(total_clients, 0, "first client has no peers");
        }
        other => panic!("expected CONNECTED, got {other:?}"),
    }

    let mut b = connect(addr, None).await;
    match next_message(&mut b).await {
        SyncMessage::Connected { total_clients, .. } => assert_eq!(total_clients, 1),
        other => panic!("expected CONNECTED, got {other:?}"),
    }
}

#[tokio::test]
async fn fan_out_reaches_everyone_but_the_sender() {
    let addr = start_relay(None).await;

    let mut a = connect(addr, None).await;
    let mut b = connect(addr, None).await;
    let mut c = connect(addr, None).await;
    next_message(&mut a).await;
    next_message(&mut b).await;
    next_message(&mut c).await;

    a.send(Message::Text(state_update("device-a", 42)))
        .await
        .expect("send");

    for ws in [&mut b, &mut c] {
        match next_message(ws).await {
            SyncMessage::StateUpdate {
                device_id, data, ..
            } => {
                assert_eq!(device_id, "device-a");
                assert_eq!(data, json!(42));
            }
            other => panic!("expected the relayed update, got {other:?}"),
        }
    }

    expect_silence(&mut a).await;
}

#[tokio::test]
async fn departure_is_announced_with_the_remaining_peer_count() {
    let addr = start_relay(None).await;

    let mut a = connect(addr, None).await;
    let mut b = connect(addr, None).await;
    let mut c = connect(addr, None).await;
    next_message(&mut a).await;
    next_message(&mut b).await;
    next_message(&mut c).await;

    drop(c);

    for ws in [&mut a, &mut b] {
        match next_message(ws).await {
            SyncMessage::ClientCountUpdate { total_clients, .. } => {
                assert_eq!(total_clients, 1, "each survivor has one peer left");
            }
            other => panic!("expected CLIENT_COUNT_UPDATE, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_harm() {
    let addr = start_relay(None).await;

    let mut a = connect(addr, None).await;
    let mut b = connect(addr, None).await;
    next_message(&mut a).await;
    next_message(&mut b).await;

    a.send(Message::Text("this is not json".to_string()))
        .await
        .expect("send garbage");
    a.send(Message::Text(state_update("device-a", 7)))
        .await
        .expect("send update");

    // Only the valid frame comes through, and the relay is still up.
    match next_message(&mut b).await {
        SyncMessage::StateUpdate { data, .. } => assert_eq!(data, json!(7)),
        other => panic!("expected the valid update, got {other:?}"),
    }

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("health request")
        .json()
        .await
        .expect("health json");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["service"], "prompter-relay");
    assert_eq!(health["connections"], 2);
    assert!(health["uptime_seconds"].is_number());
}

#[tokio::test]
async fn oversized_frames_are_dropped() {
    let addr = start_relay(None).await;

    let mut a = connect(addr, None).await;
    let mut b = connect(addr, None).await;
    next_message(&mut a).await;
    next_message(&mut b).await;

    let huge = format!("{{\"pad\":\"{}\"}}", "x".repeat(300 * 1024));
    a.send(Message::Text(huge)).await.expect("send oversized");
    a.send(Message::Text(state_update("device-a", 1)))
        .await
        .expect("send update");

    match next_message(&mut b).await {
        SyncMessage::StateUpdate { data, .. } => assert_eq!(data, json!(1)),
        other => panic!("expected only the small update, got {other:?}"),
    }
}

#[tokio::test]
async fn access_key_gates_the_upgrade() {
    let addr = start_relay(Some("opensesame")).await;

    assert!(
        connect_async(format!("ws://{addr}/ws")).await.is_err(),
        "keyless connect must be refused"
    );
    assert!(
        connect_async(format!("ws://{addr}/ws?key=wrong")).await.is_err(),
        "wrong key must be refused"
    );

    let mut ok = connect(addr, Some("opensesame")).await;
    assert!(matches!(
        next_message(&mut ok).await,
        SyncMessage::Connected { .. }
    ));
}

#[tokio::test]
async fn unknown_paths_get_a_json_404() {
    let addr = start_relay(None).await;
    let response = reqwest::get(format!("http://{addr}/nope"))
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["error"], "not found");
}
