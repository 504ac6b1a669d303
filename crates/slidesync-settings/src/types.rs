//! Settings sections.
//!
//! Every section deserializes from camelCase JSON and falls back to its
//! `Default` for missing keys, so a settings file only needs the values it
//! changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlideSyncSettings {
    /// Network and connection-hub settings.
    pub server: ServerSettings,
    /// Document upload and storage settings.
    pub documents: DocumentSettings,
    /// Controller credential settings.
    pub auth: AuthSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl SlideSyncSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.server.max_connections == 0, "server.maxConnections must be at least 1"),
            (self.server.outbox_capacity == 0, "server.outboxCapacity must be at least 1"),
            (
                self.server.event_queue_capacity == 0,
                "server.eventQueueCapacity must be at least 1",
            ),
            (self.documents.max_upload_bytes == 0, "documents.maxUploadBytes must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(SettingsError::InvalidValue((*reason).to_string())),
            None => Ok(()),
        }
    }
}

/// Listener and connection-hub settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Maximum number of concurrently registered connections.
    pub max_connections: usize,
    /// Per-connection outbound queue depth.
    pub outbox_capacity: usize,
    /// Depth of the event hub's submission queue.
    pub event_queue_capacity: usize,
    /// Socket write timeout before a peer is considered stalled.
    pub send_timeout_ms: u64,
    /// Dropped outbound messages tolerated before a connection is closed.
    pub max_dropped_messages: u64,
    /// Largest accepted inbound WebSocket frame.
    pub max_message_size: usize,
    /// CORS origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 100,
            outbox_capacity: 256,
            event_queue_capacity: 1024,
            send_timeout_ms: 10_000,
            max_dropped_messages: 64,
            max_message_size: 64 * 1024,
            allowed_origins: Vec::new(),
        }
    }
}

/// Document store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentSettings {
    /// Directory uploaded decks are written to.
    pub upload_dir: String,
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: usize,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            upload_dir: "./uploads".to_string(),
            max_upload_bytes: 10 << 20,
        }
    }
}

/// Controller credential settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Shared secret that grants the controller role. Unset disables
    /// controller access entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_secret: Option<String>,
}

impl AuthSettings {
    /// The configured secret, treating an empty string as unset.
    pub fn secret(&self) -> Option<&str> {
        self.controller_secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_documented_limits() {
        let s = SlideSyncSettings::default();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.server.max_connections, 100);
        assert_eq!(s.documents.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(s.documents.upload_dir, "./uploads");
        assert!(s.auth.controller_secret.is_none());
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn defaults_validate() {
        assert!(SlideSyncSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_max_connections_rejected() {
        let mut s = SlideSyncSettings::default();
        s.server.max_connections = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("maxConnections"));
    }

    #[test]
    fn zero_upload_limit_rejected() {
        let mut s = SlideSyncSettings::default();
        s.documents.max_upload_bytes = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("maxUploadBytes"));
    }

    #[test]
    fn empty_secret_is_unset() {
        let auth = AuthSettings {
            controller_secret: Some(String::new()),
        };
        assert!(auth.secret().is_none());
        let auth = AuthSettings {
            controller_secret: Some("s3cret".into()),
        };
        assert_eq!(auth.secret(), Some("s3cret"));
    }

    #[test]
    fn camel_case_serialization() {
        let json = serde_json::to_value(SlideSyncSettings::default()).unwrap();
        assert!(json["server"]["maxConnections"].is_number());
        assert!(json["documents"]["maxUploadBytes"].is_number());
        assert!(json["auth"].get("controllerSecret").is_none());
    }
}
