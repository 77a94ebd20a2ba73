//! Connection identity and book-keeping records.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use genflow_models::{Role, ServerMessage};

/// Unique identifier for one registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hub-internal state for one registered connection.
#[derive(Debug)]
pub(crate) struct ConnectionRecord {
    pub user_id: String,
    pub client_id: String,
    pub role: Role,
    /// Session the access token was minted for, kept for audit logs
    pub session_id: String,
    /// The one room this connection is subscribed to, if any
    pub joined_room: Option<String>,
    /// Last inbound frame or successful registration
    pub last_activity_at: DateTime<Utc>,
    /// Outbound queue owned by the connection's writer task
    pub sender: mpsc::UnboundedSender<ServerMessage>,
}
