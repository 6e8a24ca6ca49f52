use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use prompter_proto::{generate_client_id, now_millis, SyncMessage};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Frames above this size are dropped instead of relayed. The relay
/// re-broadcasts blindly, so the cap is the only thing standing between
/// one misbehaving client and everyone's bandwidth.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// One accepted connection. Only the outbound handle lives here; the
/// socket itself is owned by its handler task.
struct ClientHandle {
    tx: mpsc::UnboundedSender<String>,
}

/// The whole relay: the set of open connections and the access key they
/// had to present. No payload interpretation, no history, nothing
/// persisted.
#[derive(Clone)]
pub struct RelayState {
    clients: Arc<DashMap<String, ClientHandle>>,
    access_key: Option<String>,
    started_at: Instant,
}

impl RelayState {
    pub fn new(access_key: Option<String>) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            access_key,
            started_at: Instant::now(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn add_client(&self, client_id: String, tx: mpsc::UnboundedSender<String>) {
        self.clients.insert(client_id, ClientHandle { tx });
    }

    fn remove_client(&self, client_id: &str) {
        self.clients.remove(client_id);
    }

    /// Forward a raw frame to every open connection except the sender.
    fn broadcast_except(&self, sender_id: &str, frame: &str) {
        for entry in self.clients.iter() {
            if entry.key() != sender_id {
                let _ = entry.value().tx.send(frame.to_string());
            }
        }
    }

    fn send_to(&self, client_id: &str, message: &SyncMessage) {
        if let (Some(client), Ok(text)) = (
            self.clients.get(client_id),
            serde_json::to_string(message),
        ) {
            let _ = client.tx.send(text);
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Shared access key, `?key=...` on the connect URL.
    key: Option<String>,
}

/// WebSocket upgrade handler. The access key is checked before the
/// upgrade; a mismatch never reaches the socket layer.
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(params): Query<ConnectParams>,
    State(state): State<RelayState>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(expected) = &state.access_key {
        if params.key.as_deref() != Some(expected.as_str()) {
            warn!(%remote_addr, "rejecting connection with bad access key");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid access key"})),
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(socket: WebSocket, state: RelayState, remote_addr: SocketAddr) {
    let client_id = generate_client_id();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state.add_client(client_id.clone(), tx);
    info!(
        client = %client_id,
        %remote_addr,
        total = state.connection_count(),
        "client connected"
    );

    // Everything queued for this client goes out through one writer
    // task; handlers for other sockets only ever touch the channel.
    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        debug!(client = %writer_id, "writer task ended");
    });

    // Greet the new connection alone with its identity and how many
    // peers it has right now.
    state.send_to(
        &client_id,
        &SyncMessage::Connected {
            timestamp: now_millis(),
            device_id: client_id.clone(),
            total_clients: state.connection_count().saturating_sub(1),
        },
    );

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(client = %client_id, %err, "socket error");
                break;
            }
        };

        match frame {
            Message::Text(text) => relay_frame(&state, &client_id, &text),
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => relay_frame(&state, &client_id, &text),
                Err(_) => debug!(client = %client_id, "dropping non-UTF-8 binary frame"),
            },
            Message::Close(_) => break,
            // Protocol-level ping/pong is the socket library's business.
            _ => {}
        }
    }

    state.remove_client(&client_id);
    writer.abort();

    let remaining = state.connection_count();
    info!(client = %client_id, total = remaining, "client disconnected");
    let update = SyncMessage::ClientCountUpdate {
        timestamp: now_millis(),
        total_clients: remaining.saturating_sub(1),
    };
    if let Ok(text) = serde_json::to_string(&update) {
        state.broadcast_except(&client_id, &text);
    }
}

/// Validate and fan out one inbound frame. The relay never interprets
/// payloads: parse-or-drop, then forward the original text verbatim to
/// everyone else.
fn relay_frame(state: &RelayState, client_id: &str, text: &str) {
    if text.len() > MAX_FRAME_BYTES {
        warn!(client = %client_id, bytes = text.len(), "dropping oversized frame");
        return;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(client = %client_id, %err, "dropping malformed frame");
            return;
        }
    };

    if value.get("type").and_then(Value::as_str) == Some("STATE_UPDATE") {
        let preview: String = value
            .get("data")
            .map(|data| data.to_string())
            .unwrap_or_default()
            .chars()
            .take(50)
            .collect();
        debug!(from = %client_id, %preview, "relaying state update");
    }

    state.broadcast_except(client_id, text);
}
