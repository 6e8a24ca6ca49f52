use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prompter_proto::SyncMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use super::{Transport, TransportKind, TransportStatus};
use crate::error::SyncResult;

const TOPIC_CAPACITY: usize = 64;

static GLOBAL_BUS: Lazy<Arc<LocalBus>> = Lazy::new(|| Arc::new(LocalBus::new()));

/// In-process topic bus. Every session in the process that subscribes to
/// the same topic sees every published message, which is exactly the
/// delivery contract of the browser BroadcastChannel this stands in for.
#[derive(Debug, Default)]
pub struct LocalBus {
    topics: RwLock<HashMap<String, broadcast::Sender<SyncMessage>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus regular sessions share. Tests wire sessions
    /// to private buses instead to model separate browsers.
    pub fn global() -> Arc<LocalBus> {
        GLOBAL_BUS.clone()
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<SyncMessage> {
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<SyncMessage> {
        self.sender_for(topic).subscribe()
    }

    pub fn publish(&self, topic: &str, message: SyncMessage) {
        // A send error only means nobody is listening, which is the
        // normal lone-tab situation.
        let _ = self.sender_for(topic).send(message);
    }
}

/// The session-facing handle: one topic on one bus.
pub struct LocalTransport {
    bus: Arc<LocalBus>,
    topic: String,
    status: watch::Receiver<TransportStatus>,
    // Keeps the watch channel alive; the local bus never disconnects.
    _status_tx: watch::Sender<TransportStatus>,
}

impl LocalTransport {
    pub fn new(bus: Arc<LocalBus>, topic: impl Into<String>) -> Self {
        let (status_tx, status) = watch::channel(TransportStatus::Connected);
        Self {
            bus,
            topic: topic.into(),
            status,
            _status_tx: status_tx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    fn send(&self, message: &SyncMessage) -> SyncResult<()> {
        self.bus.publish(&self.topic, message.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.bus.subscribe(&self.topic)
    }

    fn watch_status(&self) -> watch::Receiver<TransportStatus> {
        self.status.clone()
    }
}
