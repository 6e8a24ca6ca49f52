use parking_lot::{Mutex, RwLock};
use prompter_proto::{generate_device_id, now_millis, Role, SyncMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::transport::{LocalBus, LocalTransport, RelayTransport, Transport, TransportKind};

const FANIN_CAPACITY: usize = 256;

/// Point-in-time view of the sync machinery, for the presentation layer.
/// This is the only way transport faults ever reach the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub connected: bool,
    /// Local probe count plus the relay-reported count. A device
    /// reachable over both channels is counted twice; accepted
    /// approximation, not a bug.
    pub connected_devices: usize,
    /// Millis timestamp of the last accepted remote update.
    pub last_sync: Option<i64>,
    pub error: Option<String>,
    pub role: Role,
    pub can_write: bool,
}

/// One long-lived object per client instance owning the ephemeral
/// identity, the current role, both transports and the presence probe.
/// Synchronized containers borrow all of that through an `Arc` handle.
pub struct SyncSession {
    device_id: String,
    config: SyncConfig,
    role: RwLock<Role>,
    local: Option<Arc<LocalTransport>>,
    relay: Option<Arc<RelayTransport>>,
    fanin: broadcast::Sender<SyncMessage>,
    shared: Arc<Shared>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    /// Pong senders observed in the current probe window.
    pongs: Mutex<HashSet<String>>,
    /// Published size of the last completed probe window.
    local_peers: Mutex<usize>,
    /// Last role each peer announced. Display only; no behavior keys
    /// off it beyond the acceptance policy carried per message.
    peer_roles: Mutex<HashMap<String, Role>>,
    last_sync: Mutex<Option<i64>>,
}

impl SyncSession {
    /// Session on the process-wide bus, the regular case.
    pub fn new(config: SyncConfig) -> Arc<Self> {
        Self::with_bus(config, LocalBus::global())
    }

    /// Session on an explicit bus. Tests use private buses to model
    /// separate browsers on one machine.
    pub fn with_bus(config: SyncConfig, bus: Arc<LocalBus>) -> Arc<Self> {
        let device_id = generate_device_id();
        let (fanin, _) = broadcast::channel(FANIN_CAPACITY);
        let shared = Arc::new(Shared::default());

        let mut local = None;
        let mut relay = None;
        let mut tasks = Vec::new();

        if config.enabled {
            let transport = Arc::new(LocalTransport::new(bus, config.channel.clone()));
            // Subscribe before spawning so nothing published between
            // construction and the task's first poll is missed.
            let rx = transport.subscribe();
            tasks.push(tokio::spawn(run_receive(
                transport.clone() as Arc<dyn Transport>,
                rx,
                device_id.clone(),
                shared.clone(),
                fanin.clone(),
            )));
            tasks.push(tokio::spawn(run_presence(
                transport.clone() as Arc<dyn Transport>,
                device_id.clone(),
                shared.clone(),
                config.ping_interval,
                config.pong_window,
            )));
            local = Some(transport);

            if let Some(url) = config.relay_url.clone() {
                let transport = Arc::new(RelayTransport::connect(
                    url,
                    config.access_key.as_deref(),
                    config.reconnect_delay,
                ));
                let rx = transport.subscribe();
                tasks.push(tokio::spawn(run_receive(
                    transport.clone() as Arc<dyn Transport>,
                    rx,
                    device_id.clone(),
                    shared.clone(),
                    fanin.clone(),
                )));
                relay = Some(transport);
            }
        } else {
            info!("sync disabled, state stays device-local");
        }

        Arc::new(Self {
            device_id,
            role: RwLock::new(config.initial_role),
            config,
            local,
            relay,
            fanin,
            shared,
            tasks,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    pub fn can_write(&self) -> bool {
        self.role().can_write()
    }

    /// Switch this device's role and announce it. Peers only mirror the
    /// announcement in UI; permission is re-derived locally on both
    /// ends from the role carried by each state update.
    pub fn change_role(&self, role: Role) {
        let previous = {
            let mut guard = self.role.write();
            std::mem::replace(&mut *guard, role)
        };
        if previous != role {
            info!(%previous, %role, "role changed");
        }
        self.broadcast(SyncMessage::role_change(&self.device_id, role));
    }

    /// Roles peers have announced via `ROLE_CHANGE`, keyed by device.
    pub fn peer_roles(&self) -> HashMap<String, Role> {
        self.shared.peer_roles.lock().clone()
    }

    /// Merged inbound stream from both transports.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.fanin.subscribe()
    }

    /// Push a message out on every transport we have. Fire-and-forget:
    /// per-transport failures are logged, never returned.
    pub fn broadcast(&self, message: SyncMessage) {
        for transport in self.transports() {
            if let Err(err) = transport.send(&message) {
                debug!(kind = ?transport.kind(), %err, "transport dropped outbound message");
            }
        }
    }

    /// Local-bus-only publish, used for the initial state handoff to
    /// late-joining tabs. The relay keeps no history on purpose.
    pub(crate) fn send_local(&self, message: SyncMessage) {
        if let Some(local) = &self.local {
            let _ = local.send(&message);
        }
    }

    pub(crate) fn note_sync(&self) {
        *self.shared.last_sync.lock() = Some(now_millis());
    }

    pub fn status(&self) -> SyncStatus {
        let role = self.role();
        let relay_connected = self
            .relay
            .as_ref()
            .map(|relay| relay.watch_status().borrow().is_connected())
            .unwrap_or(false);
        // Tab sync alone is meaningful synchronization, so a session
        // with just the local bus reports itself connected.
        let connected = self.local.is_some() || relay_connected;
        let relay_peers = self
            .relay
            .as_ref()
            .map(|relay| *relay.watch_peer_count().borrow())
            .unwrap_or(0);
        let error = match &self.relay {
            Some(relay) if !relay_connected => relay.last_error(),
            _ => None,
        };

        SyncStatus {
            connected,
            connected_devices: *self.shared.local_peers.lock() + relay_peers,
            last_sync: *self.shared.last_sync.lock(),
            error,
            role,
            can_write: role.can_write(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn transports(&self) -> impl Iterator<Item = &dyn Transport> {
        self.local
            .iter()
            .map(|t| t.as_ref() as &dyn Transport)
            .chain(self.relay.iter().map(|t| t.as_ref() as &dyn Transport))
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Per-transport receive loop: answers presence probes, tracks peer
/// roles, and feeds everything into the session fan-in for the
/// containers.
async fn run_receive(
    transport: Arc<dyn Transport>,
    mut rx: broadcast::Receiver<SyncMessage>,
    device_id: String,
    shared: Arc<Shared>,
    fanin: broadcast::Sender<SyncMessage>,
) {
    let collect_pongs = transport.kind() == TransportKind::Local;

    loop {
        let message = match rx.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, kind = ?transport.kind(), "receive loop lagged, messages lost");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let from_self = message.device_id() == Some(device_id.as_str());

        match &message {
            SyncMessage::Ping { .. } if !from_self => {
                // Presence replies are unconditional; they carry no
                // control authority, so no role gate applies.
                let _ = transport.send(&SyncMessage::pong(&device_id));
            }
            SyncMessage::Pong { device_id: sender, .. } if !from_self && collect_pongs => {
                shared.pongs.lock().insert(sender.clone());
            }
            SyncMessage::RoleChange { device_id: sender, role, .. } if !from_self => {
                shared.peer_roles.lock().insert(sender.clone(), *role);
            }
            _ => {}
        }

        let _ = fanin.send(message);
    }
}

/// Probe cycle: clear, ping, wait out the window, publish the count.
/// Only local-bus peers are counted here; the relay side reports its
/// own authoritative number.
async fn run_presence(
    transport: Arc<dyn Transport>,
    device_id: String,
    shared: Arc<Shared>,
    interval: std::time::Duration,
    window: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        shared.pongs.lock().clear();
        let _ = transport.send(&SyncMessage::ping(&device_id));
        tokio::time::sleep(window).await;
        let count = shared.pongs.lock().len();
        *shared.local_peers.lock() = count;
    }
}
