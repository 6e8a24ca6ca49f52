use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Shared secret clients must present at connect time. Unset means
    /// an open relay, which is fine on a trusted LAN.
    pub access_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PROMPTER_RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(9090),
            access_key: env::var("PROMPTER_ACCESS_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9090,
            access_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.port, 9090);
        assert!(config.access_key.is_none());
    }
}
