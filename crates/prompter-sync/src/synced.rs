use parking_lot::Mutex;
use prompter_proto::{now_millis, SyncMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::session::{SyncSession, SyncStatus};

/// One synchronized field: a value that broadcasts on write and merges
/// on receive, last message wins. Reads and writes never block on the
/// network and never see a transport error; a write "succeeds" locally
/// even when every broadcast of it fails.
pub struct SyncedValue<T> {
    key: String,
    session: Arc<SyncSession>,
    value: Arc<watch::Sender<T>>,
    last_local_write: Arc<Mutex<Option<Instant>>>,
    task: tokio::task::JoinHandle<()>,
}

impl<T> SyncedValue<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(session: Arc<SyncSession>, key: impl Into<String>, initial: T) -> Self {
        let key = key.into();
        let value = Arc::new(watch::channel(initial).0);
        let last_local_write = Arc::new(Mutex::new(None));

        // Subscribe before spawning so updates racing construction are
        // not missed.
        let rx = session.subscribe();
        let task = tokio::spawn(run_apply(
            session.clone(),
            rx,
            key.clone(),
            value.clone(),
            last_local_write.clone(),
        ));

        Self {
            key,
            session,
            value,
            last_local_write,
            task,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Observe every change, local or remote. This is the boundary the
    /// rendering loop consumes.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }

    /// Replace the value, if this device's role may write. A viewer's
    /// write is dropped with a warning: no local change, no broadcast.
    pub fn set(&self, value: T) {
        self.write(|_| value);
    }

    /// Updater form of [`set`](Self::set); the closure sees the current
    /// value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.write(f);
    }

    /// Hand the current value to late-joining tabs. Published on the
    /// local bus only; the relay deliberately keeps no history for new
    /// joiners.
    pub fn publish_initial(&self) {
        if !self.session.can_write() {
            return;
        }
        let data = match serde_json::to_value(&*self.value.borrow()) {
            Ok(data) => data,
            Err(err) => {
                warn!(key = %self.key, %err, "failed to serialize initial state");
                return;
            }
        };
        self.session.send_local(SyncMessage::InitialState {
            timestamp: now_millis(),
            device_id: self.session.device_id().to_string(),
            key: self.key.clone(),
            data,
            role: self.session.role(),
        });
    }

    pub fn status(&self) -> SyncStatus {
        self.session.status()
    }

    pub fn session(&self) -> &Arc<SyncSession> {
        &self.session
    }

    fn write(&self, f: impl FnOnce(&T) -> T) {
        if !self.session.can_write() {
            warn!(
                key = %self.key,
                role = %self.session.role(),
                "write ignored, this role has no control permission"
            );
            return;
        }

        let next = f(&self.value.borrow());
        self.value.send_replace(next.clone());
        *self.last_local_write.lock() = Some(Instant::now());

        // Local state is already committed; a serialization failure
        // only costs the broadcast.
        match serde_json::to_value(&next) {
            Ok(data) => self.session.broadcast(SyncMessage::StateUpdate {
                timestamp: now_millis(),
                device_id: self.session.device_id().to_string(),
                key: self.key.clone(),
                data,
                role: self.session.role(),
            }),
            Err(err) => warn!(key = %self.key, %err, "failed to serialize state update"),
        }
    }
}

impl<T> Drop for SyncedValue<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Merge loop: applies remote updates for this key, last message wins.
async fn run_apply<T>(
    session: Arc<SyncSession>,
    mut rx: broadcast::Receiver<SyncMessage>,
    key: String,
    value: Arc<watch::Sender<T>>,
    last_local_write: Arc<Mutex<Option<Instant>>>,
) where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let echo_window = session.config().echo_window;

    loop {
        let message = match rx.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(key = %key, skipped, "apply loop lagged, updates lost");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let (device_id, msg_key, data, sender_role) = match message {
            SyncMessage::StateUpdate {
                device_id,
                key,
                data,
                role,
                ..
            }
            | SyncMessage::InitialState {
                device_id,
                key,
                data,
                role,
                ..
            } => (device_id, key, data, role),
            _ => continue,
        };

        if msg_key != key {
            continue;
        }
        // Identity comparison is the primary echo guard; the relay
        // never reflects a frame to its sender, but the local bus does.
        if device_id == session.device_id() {
            continue;
        }
        // Secondary debounce: a just-written value must not be clobbered
        // by a delayed reflection of itself coming back off the wire.
        let recently_wrote = match *last_local_write.lock() {
            Some(at) => at.elapsed() < echo_window,
            None => false,
        };
        if recently_wrote {
            debug!(key = %key, from = %device_id, "dropping update inside echo window");
            continue;
        }
        // A viewer only takes direction from devices that may control;
        // writable devices accept from anyone so a host's own tabs can
        // mirror each other.
        if !session.role().can_write() && !sender_role.can_write() {
            debug!(key = %key, from = %device_id, "dropping update from non-writing sender");
            continue;
        }

        match serde_json::from_value::<T>(data) {
            Ok(next) => {
                value.send_replace(next);
                session.note_sync();
            }
            Err(err) => {
                warn!(key = %key, from = %device_id, %err, "dropping undecodable payload");
            }
        }
    }
}
