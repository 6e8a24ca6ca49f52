//! Client core for multi-device teleprompter sync.
//!
//! A [`SyncSession`] owns the device identity, the current role and the
//! two channels a client speaks at once: the in-process bus reaching
//! other sessions in this process and the WebSocket relay reaching
//! other devices. [`SyncedValue`] containers hang off the session, one
//! per synchronized field, replicating writes last-message-wins.
//!
//! ```no_run
//! use prompter_proto::TeleprompterState;
//! use prompter_sync::{SyncConfig, SyncedValue, SyncSession};
//!
//! # async fn demo() {
//! let session = SyncSession::new(SyncConfig::from_env());
//! let state = SyncedValue::new(session, "teleprompter-state", TeleprompterState::default());
//! state.update(|s| TeleprompterState { is_playing: true, ..*s });
//! # }
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod synced;
pub mod transport;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use session::{SyncSession, SyncStatus};
pub use synced::SyncedValue;
pub use transport::{LocalBus, Transport, TransportKind, TransportStatus};
