use shared::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// Runtime settings for the scene server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Ticks per second.
    pub update_rate: u32,
    /// How long a new connection may take to send its handshake request.
    pub handshake_timeout: Duration,
    /// Size of the shared map in world units.
    pub map_size: (f32, f32),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            update_rate: 60,
            handshake_timeout: Duration::from_secs(10),
            map_size: (2560.0, 2560.0),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.update_rate.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "localhost:8765");
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_tick_duration() {
        let config = ServerConfig {
            update_rate: 50,
            ..ServerConfig::default()
        };
        assert_eq!(config.tick_duration(), Duration::from_millis(20));

        let stalled = ServerConfig {
            update_rate: 0,
            ..ServerConfig::default()
        };
        assert_eq!(stalled.tick_duration(), Duration::from_secs(1));
    }
}
