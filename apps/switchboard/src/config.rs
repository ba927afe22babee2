use crate::gateway::bridge::{BridgeConfig, DEFAULT_BROADCAST_TOPIC};

/// Switchboard configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// URL path that accepts WebSocket upgrades.
    pub socket_path: String,
    /// Redis URL for the distributed bridge. Broadcasts stay local when unset.
    pub redis_url: Option<String>,
    /// Bus topic reserved for process-wide broadcasts.
    pub broadcast_topic: String,
    /// Prefix applied to every bus topic.
    pub bus_namespace: String,
}

impl Config {
    /// Load configuration from environment variables. Every variable is
    /// optional.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4010),
            socket_path: std::env::var("SOCKET_PATH")
                .ok()
                .filter(|s| s.starts_with('/'))
                .unwrap_or_else(|| "/socket".to_string()),
            redis_url: optional_var("REDIS_URL"),
            broadcast_topic: optional_var("BUS_BROADCAST_TOPIC")
                .unwrap_or_else(|| DEFAULT_BROADCAST_TOPIC.to_string()),
            bus_namespace: std::env::var("BUS_NAMESPACE").unwrap_or_default(),
        }
    }

    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            broadcast_topic: self.broadcast_topic.clone(),
            namespace: self.bus_namespace.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4010,
            socket_path: "/socket".to_string(),
            redis_url: None,
            broadcast_topic: DEFAULT_BROADCAST_TOPIC.to_string(),
            bus_namespace: String::new(),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_config_mirrors_bus_settings() {
        let config = Config {
            broadcast_topic: "all".into(),
            bus_namespace: "prod:".into(),
            ..Config::default()
        };
        let bridge = config.bridge();
        assert_eq!(bridge.broadcast_topic, "all");
        assert_eq!(bridge.namespace, "prod:");
    }

    #[test]
    fn defaults_are_local_only() {
        let config = Config::default();
        assert_eq!(config.socket_path, "/socket");
        assert!(config.redis_url.is_none());
        assert_eq!(config.broadcast_topic, DEFAULT_BROADCAST_TOPIC);
    }
}
