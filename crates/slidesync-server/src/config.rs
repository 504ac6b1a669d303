//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for [`SlideSyncServer`](crate::server::SlideSyncServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum registered participants.
    pub max_connections: usize,
    /// Outbound frames buffered per connection.
    pub outbox_capacity: usize,
    /// Pending hub events before submitters wait.
    pub event_queue_capacity: usize,
    /// Longest a single socket write may take, in milliseconds.
    pub send_timeout_ms: u64,
    /// Undeliverable frames tolerated before a connection is closed.
    pub max_dropped_messages: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: usize,
    /// Where uploaded documents are kept.
    pub upload_dir: PathBuf,
    /// CORS origins; empty allows any.
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    /// [`send_timeout_ms`](Self::send_timeout_ms) as a `Duration`.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 100,
            outbox_capacity: 256,
            event_queue_capacity: 1024,
            send_timeout_ms: 10_000,
            max_dropped_messages: 64,
            max_message_size: 64 * 1024,
            max_upload_bytes: 10 << 20, // 10 MiB
            upload_dir: PathBuf::from("./uploads"),
            allowed_origins: Vec::new(),
        }
    }
}
