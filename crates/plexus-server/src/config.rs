//! Server configuration.

use std::fmt;
use std::time::Duration;

use plexus_settings::PlexusSettings;

use crate::broker::BrokerConfig;

/// Listener, transport, and broker policy for one [`PlexusServer`](crate::server::PlexusServer).
#[derive(Clone)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Upgrade requests beyond this many peers get HTTP 503.
    pub max_connections: usize,
    /// Outbound frames buffered per peer.
    pub max_send_queue: usize,
    /// Cumulative drops before a slow peer is evicted.
    pub max_dropped_messages: u64,
    /// Largest inbound WebSocket message in bytes.
    pub max_message_size: usize,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence, in milliseconds, after which a connection is closed.
    pub heartbeat_timeout_ms: u64,
    /// Shared secret; `None` disables authentication.
    pub auth_token: Option<String>,
}

impl ServerConfig {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Liveness timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Broker policy carried by this config.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            shared_secret: self.auth_token.clone().filter(|t| !t.is_empty()),
            max_dropped_messages: self.max_dropped_messages,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            max_send_queue: 256,
            max_dropped_messages: 100,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            auth_token: None,
        }
    }
}

impl From<&PlexusSettings> for ServerConfig {
    fn from(settings: &PlexusSettings) -> Self {
        let s = &settings.server;
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            max_send_queue: s.max_send_queue,
            max_dropped_messages: s.max_dropped_messages,
            max_message_size: s.max_message_size,
            heartbeat_interval_ms: s.heartbeat_interval_ms,
            heartbeat_timeout_ms: s.heartbeat_timeout_ms,
            auth_token: settings.auth.shared_secret().map(str::to_owned),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_connections", &self.max_connections)
            .field("max_send_queue", &self.max_send_queue)
            .field("max_dropped_messages", &self.max_dropped_messages)
            .field("max_message_size", &self.max_message_size)
            .field("heartbeat_interval_ms", &self.heartbeat_interval_ms)
            .field("heartbeat_timeout_ms", &self.heartbeat_timeout_ms)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
