use prompter_proto::Role;
use std::env;
use std::time::Duration;
use url::Url;

/// Client-side configuration. Everything has a usable default; the
/// environment can point a device at a relay and hand it the shared
/// access key.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Master switch. Disabled means no transports at all: writes still
    /// work locally, nothing is replicated anywhere.
    pub enabled: bool,
    /// Namespace for the in-process broadcast bus. Sessions only see
    /// each other when they share it.
    pub channel: String,
    /// Relay endpoint, e.g. `ws://192.168.1.20:9090/ws`. `None` keeps
    /// the client in tab-sync-only mode, which is the common single
    /// operator setup.
    pub relay_url: Option<Url>,
    /// Shared secret appended to the relay URL as `?key=`.
    pub access_key: Option<String>,
    pub initial_role: Role,
    /// Presence probe cadence on the local bus.
    pub ping_interval: Duration,
    /// How long a probe collects pongs before the count is published.
    pub pong_window: Duration,
    /// Secondary guard against relayed echoes of our own writes; the
    /// primary guard is the sender identity comparison.
    pub echo_window: Duration,
    /// Flat delay between relay reconnect attempts. Retries never stop
    /// while the session is alive.
    pub reconnect_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: "teleprompter-sync".to_string(),
            relay_url: None,
            access_key: None,
            initial_role: Role::Host,
            ping_interval: Duration::from_secs(5),
            pong_window: Duration::from_millis(500),
            echo_window: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

impl SyncConfig {
    /// Read `PROMPTER_RELAY_URL`, `PROMPTER_ACCESS_KEY` and
    /// `PROMPTER_SYNC_DISABLED` on top of the defaults. An unparseable
    /// relay URL downgrades to tab-sync-only with a warning rather than
    /// failing startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var("PROMPTER_SYNC_DISABLED") {
            config.enabled = !matches_truthy(&value);
        }
        match env::var("PROMPTER_RELAY_URL") {
            Ok(raw) if !raw.trim().is_empty() => match Url::parse(raw.trim()) {
                Ok(url) => config.relay_url = Some(url),
                Err(err) => {
                    tracing::warn!(%raw, %err, "ignoring unparseable PROMPTER_RELAY_URL");
                }
            },
            _ => {}
        }
        if let Ok(key) = env::var("PROMPTER_ACCESS_KEY") {
            if !key.is_empty() {
                config.access_key = Some(key);
            }
        }

        config
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.initial_role = role;
        self
    }

    pub fn with_relay(mut self, url: Url) -> Self {
        self.relay_url = Some(url);
        self
    }
}

fn matches_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_only() {
        let config = SyncConfig::default();
        assert!(config.enabled);
        assert!(config.relay_url.is_none());
        assert_eq!(config.initial_role, Role::Host);
    }

    #[test]
    fn truthy_parsing() {
        assert!(matches_truthy("1"));
        assert!(matches_truthy(" TRUE "));
        assert!(!matches_truthy("0"));
        assert!(!matches_truthy("off"));
    }
}
