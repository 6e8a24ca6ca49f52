//! The two channels a session speaks simultaneously: the in-process bus
//! reaching other sessions in the same process (the "other tabs" case)
//! and the relay connection reaching other devices on the network.
//! Either may be absent; neither failing is fatal to the other.

use prompter_proto::SyncMessage;
use tokio::sync::{broadcast, watch};

use crate::error::SyncResult;

pub mod local;
pub mod relay;

pub use local::{LocalBus, LocalTransport};
pub use relay::RelayTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Local,
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Connected,
    Disconnected,
}

impl TransportStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, TransportStatus::Connected)
    }
}

/// A fire-and-forget message channel. `send` never blocks and never
/// surfaces transport faults to the write path; delivery is best-effort
/// by design.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Enqueue a message for every other party on this channel.
    fn send(&self, message: &SyncMessage) -> SyncResult<()>;

    /// Inbound messages, including (on the local bus) our own — the
    /// session filters by sender identity.
    fn subscribe(&self) -> broadcast::Receiver<SyncMessage>;

    /// Connectivity changes, for the status snapshot.
    fn watch_status(&self) -> watch::Receiver<TransportStatus>;
}
