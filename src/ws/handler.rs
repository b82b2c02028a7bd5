use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::db::models::{is_valid_user_id, UserId};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection: `?user_id=N`.
/// Kept as a string so a bad value reaches the close path instead of a 400.
#[derive(Debug, Deserialize)]
pub struct WsIdentityQuery {
    pub user_id: Option<String>,
}

impl WsIdentityQuery {
    /// Parsed identity, or 0 when absent or non-numeric.
    pub fn identity(&self) -> UserId {
        self.user_id
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// WebSocket close code for a handshake with no usable identity.
pub const CLOSE_INVALID_IDENTITY: u16 = 4002;

/// GET /ws?user_id=N
/// WebSocket upgrade endpoint. A non-positive identity upgrades and
/// immediately closes with 4002; a valid one hands the socket to an actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<WsIdentityQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = params.identity();

    if is_valid_user_id(user_id) {
        tracing::info!(user_id, remote = %addr, "WebSocket connection accepted");
        return ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id));
    }

    tracing::warn!(
        raw_user_id = ?params.user_id,
        remote = %addr,
        close_code = CLOSE_INVALID_IDENTITY,
        "WebSocket handshake rejected: invalid identity"
    );

    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: CLOSE_INVALID_IDENTITY,
            reason: "Invalid identity".into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
        actor::record_disconnect(&state, user_id, "rejected at handshake").await;
    })
}
