//! Settings types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlexusSettings {
    /// Listener and per-connection limits.
    pub server: ServerSettings,
    /// Shared-secret gate.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl PlexusSettings {
    /// Reject combinations that would make the broker unusable.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if s.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if s.heartbeat_interval_ms == 0 || s.heartbeat_timeout_ms < s.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutMs ({}) must be >= heartbeatIntervalMs ({}) and the interval non-zero",
                s.heartbeat_timeout_ms, s.heartbeat_interval_ms
            )));
        }
        Ok(())
    }
}

/// Network listener and connection policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Upgrade requests beyond this many live peers get HTTP 503.
    pub max_connections: usize,
    /// Outbound frames buffered per peer before sends start failing.
    pub max_send_queue: usize,
    /// Cumulative dropped frames after which a slow peer is disconnected.
    pub max_dropped_messages: u64,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection that has been silent this long, in milliseconds.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6121,
            max_connections: 256,
            max_send_queue: 256,
            max_dropped_messages: 100,
            max_message_size: 16 * 1024 * 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
        }
    }
}

/// Shared-secret authentication.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Token peers must present via `module:authenticate`. `None` or an
    /// empty string disables the gate.
    pub token: Option<String>,
}

impl AuthSettings {
    /// The configured secret, with empty strings treated as unset.
    pub fn shared_secret(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(SettingsError::InvalidValue(format!(
                "unknown log format '{other}' (expected 'pretty' or 'json')"
            ))),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Base level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Per-target level overrides, e.g. `{"plexus_server::broker": "debug"}`.
    pub module_levels: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            module_levels: std::collections::BTreeMap::new(),
        }
    }
}
