//! Wire messages exchanged over the `/ws` endpoint.
//!
//! Every frame is a JSON object discriminated by `type`; fields that do not
//! apply to a variant are omitted. Inbound and outbound variants are split
//! into [`ClientMessage`] and [`ServerMessage`] so a client can never inject a
//! server-only frame (such as `user_count`) into a broadcast.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

/// Error text sent when the controller secret does not match.
pub const INVALID_CREDENTIALS: &str = "Invalid admin credentials";

/// Error text sent when a controller submits an unusable page number.
pub const INVALID_PAGE: &str = "Invalid page number";

/// Frames a participant may send.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request the controller role.
    Auth {
        /// Presented secret. Absent and `null` both read as empty.
        #[serde(default, deserialize_with = "null_as_default")]
        password: String,
    },
    /// Move every viewer to `page`. Range checks happen in the session
    /// controller, so any integer (or nothing) decodes here.
    PageChange {
        /// Requested 1-based page.
        #[serde(default)]
        page: Option<i64>,
    },
    /// Any other `type`, including server-only ones. Ignored.
    #[serde(other)]
    Other,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ClientMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Frames the server sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Result of a successful `auth`.
    AdminStatus {
        /// Always `true`; failures are reported as [`ServerMessage::Error`].
        #[serde(rename = "isAdmin")]
        is_admin: bool,
    },
    /// The controller moved to `page`.
    PageChange {
        /// 1-based page number.
        page: u32,
    },
    /// Number of registered participants.
    UserCount {
        /// Registry size after the last connect/disconnect.
        count: usize,
    },
    /// A new deck is retrievable at `/uploads/{filename}`.
    NewPdf {
        /// Stored document name.
        filename: String,
    },
    /// A request from this connection was refused.
    Error {
        /// Human-readable reason.
        error: String,
    },
}

impl ServerMessage {
    /// Build an error frame.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            error: reason.into(),
        }
    }

    /// Short name for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AdminStatus { .. } => "admin_status",
            Self::PageChange { .. } => "page_change",
            Self::UserCount { .. } => "user_count",
            Self::NewPdf { .. } => "new_pdf",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize once into a shareable text frame.
    pub fn to_frame(&self) -> serde_json::Result<Arc<str>> {
        serde_json::to_string(self).map(Arc::from)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
