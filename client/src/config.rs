use serde_json::{Map, Value};
use shared::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// Connection settings for a remote scene client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Screen size requested in the handshake.
    pub resolution: (u32, u32),
    pub connect_attempts: u32,
    /// Pause between failed connection attempts.
    pub retry_delay: Duration,
    pub handshake_timeout: Duration,
    /// Sent verbatim in the handshake, e.g. the player's name.
    pub client_data: Map<String, Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            resolution: (1280, 720),
            connect_attempts: 10,
            retry_delay: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            client_data: Map::new(),
        }
    }
}

impl ClientConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.client_data.insert("name".to_string(), Value::String(name.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default().with_name("Mary Read");
        assert_eq!(config.url(), "ws://localhost:8765");
        assert_eq!(config.connect_attempts, 10);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.client_data["name"], "Mary Read");
    }
}
