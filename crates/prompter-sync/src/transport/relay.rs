use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use prompter_proto::SyncMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{Transport, TransportKind, TransportStatus};
use crate::error::{SyncError, SyncResult};

const INBOUND_CAPACITY: usize = 64;

/// Network half of the transport pair: a persistent WebSocket to the
/// relay. Best-effort by contract — while the relay is unreachable the
/// local bus keeps the session alive, and this transport keeps retrying
/// on a flat interval until the session is dropped.
pub struct RelayTransport {
    outbound: mpsc::UnboundedSender<SyncMessage>,
    inbound: broadcast::Sender<SyncMessage>,
    status: watch::Receiver<TransportStatus>,
    peer_count: watch::Receiver<usize>,
    last_error: Arc<Mutex<Option<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl RelayTransport {
    /// Start the connection manager. Returns immediately; connectivity
    /// is reported through [`Transport::watch_status`].
    pub fn connect(url: Url, access_key: Option<&str>, reconnect_delay: Duration) -> Self {
        let mut connect_url = url;
        if let Some(key) = access_key {
            connect_url.query_pairs_mut().append_pair("key", key);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, _) = broadcast::channel(INBOUND_CAPACITY);
        let (status_tx, status_rx) = watch::channel(TransportStatus::Disconnected);
        let (count_tx, count_rx) = watch::channel(0usize);
        let last_error = Arc::new(Mutex::new(None));

        let task = tokio::spawn(run_manager(
            connect_url,
            reconnect_delay,
            outbound_rx,
            inbound_tx.clone(),
            status_tx,
            count_tx,
            last_error.clone(),
        ));

        Self {
            outbound: outbound_tx,
            inbound: inbound_tx,
            status: status_rx,
            peer_count: count_rx,
            last_error,
            task,
        }
    }

    /// Count of other devices currently connected to the relay, as the
    /// relay itself reports it. Authoritative for the network side,
    /// unlike the probe-based local count.
    pub fn watch_peer_count(&self) -> watch::Receiver<usize> {
        self.peer_count.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}

impl Transport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn send(&self, message: &SyncMessage) -> SyncResult<()> {
        if !self.status.borrow().is_connected() {
            return Err(SyncError::Offline);
        }
        self.outbound
            .send(message.clone())
            .map_err(|_| SyncError::ChannelClosed)
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.inbound.subscribe()
    }

    fn watch_status(&self) -> watch::Receiver<TransportStatus> {
        self.status.clone()
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_manager(
    url: Url,
    reconnect_delay: Duration,
    mut outbound: mpsc::UnboundedReceiver<SyncMessage>,
    inbound: broadcast::Sender<SyncMessage>,
    status: watch::Sender<TransportStatus>,
    count: watch::Sender<usize>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(url = %url, "relay connected");
                last_error.lock().take();

                // Anything queued while we were offline is stale state
                // by now; the next write supersedes it.
                let mut dropped = 0usize;
                while outbound.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    debug!(dropped, "discarded messages queued while offline");
                }

                let _ = status.send(TransportStatus::Connected);
                let reason = run_connection(stream, &mut outbound, &inbound, &count).await;
                let _ = status.send(TransportStatus::Disconnected);
                *last_error.lock() = Some(reason.clone());
                info!(url = %url, %reason, "relay disconnected, will retry");
            }
            Err(err) => {
                debug!(url = %url, %err, "relay connect failed, will retry");
                *last_error.lock() = Some(err.to_string());
            }
        }

        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn run_connection(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    outbound: &mut mpsc::UnboundedReceiver<SyncMessage>,
    inbound: &broadcast::Sender<SyncMessage>,
    count: &watch::Sender<usize>,
) -> String {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(message) => match serde_json::to_string(&message) {
                    Ok(text) => {
                        if let Err(err) = sink.send(Message::Text(text)).await {
                            return format!("send failed: {err}");
                        }
                    }
                    Err(err) => warn!(%err, "failed to serialize outbound message"),
                },
                None => return "session dropped".to_string(),
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch_frame(&text, inbound, count),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => dispatch_frame(&text, inbound, count),
                    Err(_) => debug!("dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return "relay closed the connection".to_string();
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return err.to_string(),
            },
        }
    }
}

fn dispatch_frame(text: &str, inbound: &broadcast::Sender<SyncMessage>, count: &watch::Sender<usize>) {
    let message: SyncMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(%err, "dropping malformed relay frame");
            return;
        }
    };

    match &message {
        SyncMessage::Connected { total_clients, .. }
        | SyncMessage::ClientCountUpdate { total_clients, .. } => {
            let _ = count.send(*total_clients);
        }
        _ => {}
    }

    let _ = inbound.send(message);
}
