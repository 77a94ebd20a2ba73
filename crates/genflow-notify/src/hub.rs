//! Room-scoped connection hub with reference-counted presence.
//!
//! Each registered connection gets an unbounded outbound queue; the
//! transport layer drains the queue onto the socket. Room membership
//! drives presence: a user is `online` in a room while at least one of
//! their connections is joined, and `offline` only once the last one
//! leaves or disconnects. All book-keeping lives behind one `RwLock`,
//! so membership changes and the presence broadcasts they trigger are
//! atomic with respect to each other.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use genflow_models::{wire, PresenceStatus, Role, ServerMessage};

use crate::connection::{ConnectionId, ConnectionRecord};
use crate::error::{NotifyError, NotifyResult};

/// Default idle eviction threshold (one hour of silence).
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3_600;

/// Default interval between idle sweeps.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default cap on simultaneous connections per user.
const DEFAULT_MAX_CONNECTIONS_PER_USER: usize = 8;

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Connections silent for longer than this get evicted
    pub idle_timeout: Duration,
    /// How often the idle sweep runs
    pub sweep_interval: Duration,
    /// Upper bound on open connections per user (multi-tab allowance)
    pub max_connections_per_user: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_connections_per_user: DEFAULT_MAX_CONNECTIONS_PER_USER,
        }
    }
}

impl HubConfig {
    /// Load configuration from environment variables, with defaults.
    pub fn from_env() -> Self {
        let idle_timeout_secs = std::env::var("WS_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
        let sweep_interval_secs = std::env::var("WS_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
        let max_connections_per_user = std::env::var("WS_MAX_CONNECTIONS_PER_USER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_USER);

        Self {
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            max_connections_per_user,
        }
    }
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    /// user id -> every connection that user currently holds
    user_index: HashMap<String, HashSet<ConnectionId>>,
    /// room -> user id -> that user's connections joined to the room
    rooms: HashMap<String, HashMap<String, HashSet<ConnectionId>>>,
}

/// Shared in-memory hub for realtime delivery.
pub struct NotificationHub {
    state: RwLock<HubState>,
    config: HubConfig,
}

impl NotificationHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            config,
        }
    }

    /// Register an authenticated connection and hand back its outbound
    /// queue. The transport drains the queue; when the hub drops the
    /// sending half, the transport knows to close the socket.
    pub async fn register(
        &self,
        user_id: &str,
        client_id: &str,
        role: Role,
        session_id: &str,
    ) -> NotifyResult<(ConnectionId, mpsc::UnboundedReceiver<ServerMessage>)> {
        let mut state = self.state.write().await;

        let open = state.user_index.get(user_id).map_or(0, |set| set.len());
        if open >= self.config.max_connections_per_user {
            warn!(user_id, open, "refusing connection, per-user limit reached");
            return Err(NotifyError::ConnectionLimit {
                user_id: user_id.to_string(),
                limit: self.config.max_connections_per_user,
            });
        }

        let id = ConnectionId::new();
        let (sender, receiver) = mpsc::unbounded_channel();
        state.connections.insert(
            id.clone(),
            ConnectionRecord {
                user_id: user_id.to_string(),
                client_id: client_id.to_string(),
                role,
                session_id: session_id.to_string(),
                joined_room: None,
                last_activity_at: Utc::now(),
                sender,
            },
        );
        state
            .user_index
            .entry(user_id.to_string())
            .or_default()
            .insert(id.clone());

        debug!(connection_id = %id, user_id, client_id, role = role.as_str(), "connection registered");
        Ok((id, receiver))
    }

    /// Join a client room, leaving the previous one first.
    ///
    /// Room names must match `client_<clientId>`; non-admins may only
    /// join their own tenant's room. The user's first connection in the
    /// room triggers an `online` presence broadcast.
    pub async fn join_room(&self, id: &ConnectionId, room: &str) -> NotifyResult<()> {
        let room_client = wire::parse_client_room(room).ok_or_else(|| {
            NotifyError::RoomRejected(format!(
                "name must match {}<clientId>, got {room:?}",
                wire::ROOM_PREFIX
            ))
        })?;

        let mut state = self.state.write().await;

        let (user_id, client_id, previous) = {
            let record = state
                .connections
                .get(id)
                .ok_or_else(|| NotifyError::NotRegistered(id.clone()))?;
            if !record.role.is_admin() && record.client_id != room_client {
                return Err(NotifyError::RoomRejected(format!(
                    "client {} is not allowed in {room}",
                    record.client_id
                )));
            }
            (
                record.user_id.clone(),
                record.client_id.clone(),
                record.joined_room.clone(),
            )
        };

        if previous.as_deref() == Some(room) {
            // Re-joining the current room just refreshes activity.
            if let Some(record) = state.connections.get_mut(id) {
                record.last_activity_at = Utc::now();
            }
            return Ok(());
        }

        // One client room at a time.
        if let Some(previous) = previous {
            Self::remove_membership(&mut state, id, &previous);
        }

        if let Some(record) = state.connections.get_mut(id) {
            record.joined_room = Some(room.to_string());
            record.last_activity_at = Utc::now();
        }
        let members = state
            .rooms
            .entry(room.to_string())
            .or_default()
            .entry(user_id.clone())
            .or_default();
        let came_online = members.is_empty();
        members.insert(id.clone());

        if came_online {
            let update = ServerMessage::presence(&user_id, &client_id, PresenceStatus::Online);
            let delivered = Self::emit_to_room(&state, room, &update);
            debug!(user_id, room, delivered, "user online in room");
        }

        Ok(())
    }

    /// Leave a room. Leaving one the connection never joined is a no-op.
    pub async fn leave_room(&self, id: &ConnectionId, room: &str) -> NotifyResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .connections
            .get(id)
            .ok_or_else(|| NotifyError::NotRegistered(id.clone()))?;
        if record.joined_room.as_deref() != Some(room) {
            return Ok(());
        }

        Self::remove_membership(&mut state, id, room);
        if let Some(record) = state.connections.get_mut(id) {
            record.last_activity_at = Utc::now();
        }
        Ok(())
    }

    /// Record inbound activity on a connection.
    pub async fn touch(&self, id: &ConnectionId) {
        if let Some(record) = self.state.write().await.connections.get_mut(id) {
            record.last_activity_at = Utc::now();
        }
    }

    /// Drop a connection entirely, leaving any joined room on the way
    /// out so presence cannot leak a phantom member.
    pub async fn disconnect(&self, id: &ConnectionId) {
        let mut state = self.state.write().await;
        let Some(room) = state.connections.get(id).map(|r| r.joined_room.clone()) else {
            return;
        };
        if let Some(room) = room {
            Self::remove_membership(&mut state, id, &room);
        }
        let Some(record) = state.connections.remove(id) else {
            return;
        };
        if let Some(set) = state.user_index.get_mut(&record.user_id) {
            set.remove(id);
            if set.is_empty() {
                state.user_index.remove(&record.user_id);
            }
        }
        debug!(
            connection_id = %id,
            user_id = %record.user_id,
            session_id = %record.session_id,
            "connection closed"
        );
    }

    /// Send to every open connection.
    pub async fn broadcast_all(&self, message: &ServerMessage) -> usize {
        let state = self.state.read().await;
        let mut delivered = 0;
        for record in state.connections.values() {
            if record.sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send to every connection currently joined to a room.
    pub async fn broadcast_room(&self, room: &str, message: &ServerMessage) -> usize {
        let state = self.state.read().await;
        Self::emit_to_room(&state, room, message)
    }

    /// Send to every connection a user holds, joined to a room or not.
    pub async fn send_to_user(&self, user_id: &str, message: &ServerMessage) -> usize {
        let state = self.state.read().await;
        let Some(ids) = state.user_index.get(user_id) else {
            return 0;
        };
        let mut delivered = 0;
        for id in ids {
            if let Some(record) = state.connections.get(id) {
                if record.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Send to a single connection. False when it is gone or closed.
    pub async fn send_to_connection(&self, id: &ConnectionId, message: &ServerMessage) -> bool {
        let state = self.state.read().await;
        state
            .connections
            .get(id)
            .map(|record| record.sender.send(message.clone()).is_ok())
            .unwrap_or(false)
    }

    /// Evict connections whose peer went silent past the idle timeout,
    /// plus any whose transport already dropped its receiver.
    pub async fn sweep_idle(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.idle_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_IDLE_TIMEOUT_SECS as i64));

        let stale: Vec<ConnectionId> = {
            let state = self.state.read().await;
            state
                .connections
                .iter()
                .filter(|(_, r)| r.sender.is_closed() || r.last_activity_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in &stale {
            self.disconnect(id).await;
        }
        if !stale.is_empty() {
            info!(evicted = stale.len(), "swept stale connections");
        }
        stale.len()
    }

    /// Run the idle sweep until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "notification hub sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_idle().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("notification hub sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Drop every connection at once. Each transport sees its queue
    /// close and shuts the socket down.
    pub async fn shutdown_all(&self) {
        let mut state = self.state.write().await;
        let dropped = state.connections.len();
        state.connections.clear();
        state.user_index.clear();
        state.rooms.clear();
        if dropped > 0 {
            info!(dropped, "closed all connections");
        }
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Number of rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    /// Drop one connection's membership in a room, broadcasting
    /// `offline` presence only when it was the user's last connection
    /// there. Emission happens after removal, so the departing
    /// connection never hears its own exit.
    fn remove_membership(state: &mut HubState, id: &ConnectionId, room: &str) {
        let Some(record) = state.connections.get_mut(id) else {
            return;
        };
        if record.joined_room.as_deref() == Some(room) {
            record.joined_room = None;
        }
        let user_id = record.user_id.clone();
        let client_id = record.client_id.clone();

        let mut went_offline = false;
        if let Some(members) = state.rooms.get_mut(room) {
            if let Some(conns) = members.get_mut(&user_id) {
                conns.remove(id);
                if conns.is_empty() {
                    members.remove(&user_id);
                    went_offline = true;
                }
            }
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }

        if went_offline {
            let update = ServerMessage::presence(&user_id, &client_id, PresenceStatus::Offline);
            let delivered = Self::emit_to_room(state, room, &update);
            debug!(user_id, room, delivered, "user offline in room");
        }
    }

    fn emit_to_room(state: &HubState, room: &str, message: &ServerMessage) -> usize {
        let Some(members) = state.rooms.get(room) else {
            return 0;
        };
        let mut delivered = 0;
        for ids in members.values() {
            for id in ids {
                if let Some(record) = state.connections.get(id) {
                    if record.sender.send(message.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
