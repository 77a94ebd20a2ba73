//! Room-based realtime notification hub.
//!
//! Tracks websocket connections, their room membership, and per-room
//! user presence. Transport concerns (the actual sockets) live in the
//! API layer; the hub only owns book-keeping and message fan-out, so
//! it is fully testable without a network.

pub mod connection;
pub mod error;
pub mod hub;

pub use connection::ConnectionId;
pub use error::{NotifyError, NotifyResult};
pub use hub::{HubConfig, NotificationHub};
