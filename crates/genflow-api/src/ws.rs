//! WebSocket notification endpoint.
//!
//! The handshake is authenticated before the upgrade completes: a
//! missing or bad token answers 401 and no socket ever exists. Once
//! upgraded, the connection is registered with the hub and the task
//! select-loops hub fan-out against client frames until either side
//! closes.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use genflow_models::{ClientMessage, ServerMessage};
use genflow_notify::ConnectionId;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;

/// Endpoint label used in websocket metrics.
const WS_ENDPOINT: &str = "notify";

/// Handshake query parameters.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub csrf: Option<String>,
}

/// `GET /ws` - authenticated notification socket.
pub async fn ws_notify(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &query)?;

    metrics::record_ws_connection(WS_ENDPOINT);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

/// Verify the access token, and the anti-forgery binding when the
/// deployment demands one.
fn authenticate(state: &AppState, query: &WsQuery) -> Result<AuthUser, ApiError> {
    let token = query
        .token
        .as_deref()
        .ok_or_else(|| ApiError::unauthorized("Missing access token"))?;
    let claims = state.tokens.verify(token)?;

    if state.config.require_csrf {
        let binding = query
            .csrf
            .as_deref()
            .ok_or_else(|| ApiError::forbidden("Missing anti-forgery token"))?;
        if !state.tokens.verify_session_binding(&claims.sid, binding) {
            return Err(ApiError::forbidden("Anti-forgery token mismatch"));
        }
    }

    Ok(AuthUser::from_claims(claims))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthUser) {
    let (mut sink, mut stream) = socket.split();

    let registered = state
        .hub
        .register(&user.user_id, &user.client_id, user.role, &user.session_id)
        .await;
    let (connection_id, mut outbound) = match registered {
        Ok(pair) => pair,
        Err(e) => {
            warn!(user_id = %user.user_id, "websocket registration refused: {e}");
            let _ = send(&mut sink, &ServerMessage::error(e.to_string())).await;
            let _ = sink.close().await;
            return;
        }
    };
    metrics::set_ws_active_connections(state.hub.connection_count().await as i64);

    let ack = ServerMessage::connected(connection_id.as_str(), &user.user_id, &user.client_id);
    if send(&mut sink, &ack).await.is_err() {
        state.hub.disconnect(&connection_id).await;
        return;
    }

    info!(
        connection_id = %connection_id,
        user_id = %user.user_id,
        client_id = %user.client_id,
        "websocket connected"
    );

    loop {
        tokio::select! {
            // Hub fan-out toward the client. A closed queue means the
            // hub evicted or shut down this connection.
            message = outbound.recv() => match message {
                Some(message) => {
                    if send(&mut sink, &message).await.is_err() {
                        debug!(connection_id = %connection_id, "client went away mid-send");
                        break;
                    }
                }
                None => {
                    debug!(connection_id = %connection_id, "hub closed the connection");
                    let _ = sink.close().await;
                    break;
                }
            },
            // Client frames.
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    state.hub.touch(&connection_id).await;
                    metrics::record_ws_message_received(WS_ENDPOINT);
                    handle_client_message(&state, &connection_id, &text).await;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    state.hub.touch(&connection_id).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(connection_id = %connection_id, "client closed connection");
                    break;
                }
                Some(Ok(Message::Binary(_))) => {
                    state.hub.touch(&connection_id).await;
                    let reject = ServerMessage::error("binary frames are not supported");
                    let _ = send(&mut sink, &reject).await;
                }
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, "websocket transport error: {e}");
                    break;
                }
            },
        }
    }

    state.hub.disconnect(&connection_id).await;
    metrics::set_ws_active_connections(state.hub.connection_count().await as i64);
    info!(connection_id = %connection_id, user_id = %user.user_id, "websocket ended");
}

/// Apply one client frame. Rejections go back on the connection's own
/// queue; the connection itself stays open.
async fn handle_client_message(state: &AppState, connection_id: &ConnectionId, text: &str) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            let reject = ServerMessage::error(format!("unrecognized message: {e}"));
            state.hub.send_to_connection(connection_id, &reject).await;
            return;
        }
    };

    match parsed {
        ClientMessage::JoinRoom { room } => {
            if let Err(e) = state.hub.join_room(connection_id, &room).await {
                debug!(connection_id = %connection_id, room, "join rejected: {e}");
                let reject = ServerMessage::error(e.to_string());
                state.hub.send_to_connection(connection_id, &reject).await;
            }
        }
        ClientMessage::LeaveRoom { room } => {
            if let Err(e) = state.hub.leave_room(connection_id, &room).await {
                let reject = ServerMessage::error(e.to_string());
                state.hub.send_to_connection(connection_id, &reject).await;
            }
        }
        ClientMessage::Ping => {
            // counted by `send` when the queued reply is flushed
            state
                .hub
                .send_to_connection(connection_id, &ServerMessage::pong())
                .await;
        }
    }
}

async fn send(
    sink: &mut (impl SinkExt<Message> + Unpin),
    message: &ServerMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    metrics::record_ws_message_sent(WS_ENDPOINT, message_tag(message));
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

fn message_tag(message: &ServerMessage) -> &'static str {
    match message {
        ServerMessage::Connected { .. } => "connected",
        ServerMessage::JobProgress { .. } => "job_progress",
        ServerMessage::UserPresenceUpdate { .. } => "presence",
        ServerMessage::Pong { .. } => "pong",
        ServerMessage::Error { .. } => "error",
    }
}
