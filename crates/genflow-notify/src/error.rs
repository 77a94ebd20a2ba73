//! Hub error types.

use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors surfaced to the transport layer.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Room rejected: {0}")]
    RoomRejected(String),

    #[error("Connection is not registered: {0}")]
    NotRegistered(ConnectionId),

    #[error("User {user_id} already has {limit} open connections")]
    ConnectionLimit { user_id: String, limit: usize },
}

pub type NotifyResult<T> = Result<T, NotifyError>;
