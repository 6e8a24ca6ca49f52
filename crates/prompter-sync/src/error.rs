use thiserror::Error;

/// Transport-level faults. These never cross the container's public
/// read/write boundary; they are absorbed by the session and surface
/// only through the status snapshot.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync channel closed")]
    ChannelClosed,
    #[error("transport offline")]
    Offline,
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
