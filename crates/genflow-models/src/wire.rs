//! WebSocket wire protocol for realtime job and presence updates.
//!
//! Message tags are SCREAMING_SNAKE_CASE and payload fields camelCase,
//! matching the browser clients.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobKind, JobStatus};

/// Prefix of every valid notification room name.
pub const ROOM_PREFIX: &str = "client_";

/// Build the room name that carries one tenant's notifications.
pub fn client_room(client_id: &str) -> String {
    format!("{ROOM_PREFIX}{client_id}")
}

/// Parse a room name, returning the tenant it addresses.
///
/// Only `client_<clientId>` rooms exist; anything else is rejected,
/// including an empty or malformed tenant suffix.
pub fn parse_client_room(room: &str) -> Option<&str> {
    let client_id = room.strip_prefix(ROOM_PREFIX)?;
    if client_id.is_empty() || client_id.len() > 128 {
        return None;
    }
    if !client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }
    Some(client_id)
}

/// Presence state of a user within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Messages a connected client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Subscribe to a tenant room
    JoinRoom { room: String },

    /// Unsubscribe from a tenant room
    LeaveRoom { room: String },

    /// Application-level keepalive
    Ping,
}

/// Messages the server pushes to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Handshake acknowledgement, first frame on every connection
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Job lifecycle update for a room's tenant
    JobProgress {
        #[serde(rename = "jobId")]
        job_id: String,
        kind: JobKind,
        status: JobStatus,
        progress: u8,
        #[serde(rename = "resultUrls", skip_serializing_if = "Option::is_none")]
        result_urls: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A user in the room came online or went offline
    UserPresenceUpdate {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "clientId")]
        client_id: String,
        status: PresenceStatus,
        #[serde(rename = "lastSeen")]
        last_seen: DateTime<Utc>,
    },

    /// Keepalive reply
    Pong { timestamp: DateTime<Utc> },

    /// Per-message rejection, connection stays open
    Error { message: String },
}

impl ServerMessage {
    /// Create a handshake acknowledgement.
    pub fn connected(
        connection_id: impl Into<String>,
        user_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self::Connected {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            client_id: client_id.into(),
        }
    }

    /// Create a presence update stamped with the current time.
    pub fn presence(
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        status: PresenceStatus,
    ) -> Self {
        Self::UserPresenceUpdate {
            user_id: user_id.into(),
            client_id: client_id.into(),
            status,
            last_seen: Utc::now(),
        }
    }

    /// Create a keepalive reply stamped with the current time.
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    /// Create a per-message rejection.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
