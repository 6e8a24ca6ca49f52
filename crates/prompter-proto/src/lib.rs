//! Wire protocol shared between the prompter clients and the relay.
//! Kept in a dedicated crate so the relay binary does not pull in the
//! client runtime and vice versa.

pub mod message;
pub mod pairing;
pub mod role;
pub mod state;

pub use message::{now_millis, SyncMessage};
pub use role::Role;
pub use state::TeleprompterState;

use uuid::Uuid;

/// Generate the ephemeral identity for a client instance. Unique with
/// high probability for the lifetime of the pairing session; never
/// persisted, regenerated on every start.
pub fn generate_device_id() -> String {
    format!("device-{}", Uuid::new_v4())
}

/// Identity the relay assigns to an accepted connection.
pub fn generate_client_id() -> String {
    format!("client-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_are_unique() {
        assert_ne!(generate_device_id(), generate_device_id());
    }
}
