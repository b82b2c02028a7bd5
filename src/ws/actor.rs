use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::router::MessageRouter;
use crate::db::models::UserId;
use crate::state::{AppState, Heartbeat};
use crate::ws::protocol::ServerFrame;
use crate::ws::ConnectionHandle;

/// Lifecycle of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Admitted,
    Disconnected,
}

/// Run the actor-per-connection pattern for an identified WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming messages, dispatches to the router
///
/// The mpsc channel allows any part of the system to send messages to this client
/// by cloning the sender.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let mut lifecycle = ConnectionState::Connecting;
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let handle = ConnectionHandle::new(tx.clone());
    let connection_id = handle.id();

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let first = match state.connections.admit(user_id, handle.clone()) {
        Ok(first) => first,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Admission refused");
            handle.close(super::handler::CLOSE_INVALID_IDENTITY, "Invalid identity");
            let _ = (&mut writer_handle).await;
            record_disconnect(&state, user_id, "admission refused").await;
            return;
        }
    };
    lifecycle = transition(lifecycle, ConnectionState::Admitted, user_id);

    send_unread_counts(&state, user_id, &handle).await;
    state.presence.user_admitted(user_id, first).await;
    record_event(&state, user_id, "connected", format!("connection {connection_id}")).await;

    tracing::info!(
        user_id,
        connection_id = %connection_id,
        first,
        "WebSocket actor started"
    );

    // Track pong reception
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let mut ping_handle = tokio::spawn(ping_task(tx.clone(), pong_rx, state.heartbeat));

    let router = MessageRouter::new(state.clone(), user_id, handle);

    // Reader loop: process incoming WebSocket messages until either side closes.
    // The ping task only returns once the connection is dead or being closed.
    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut ping_handle => {
                tracing::info!(user_id, "Heartbeat expired, server closing connection");
                // Let the writer flush the queued close frame.
                let _ = timeout(state.heartbeat.pong_timeout, &mut writer_handle).await;
                break;
            }
        };
        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    router.handle_text(text.as_str()).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id,
                        bytes = data.len(),
                        "Ignoring binary frame (protocol is JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(user_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    let last = state.connections.remove(user_id, connection_id);
    state.presence.user_removed(user_id, last).await;
    lifecycle = transition(lifecycle, ConnectionState::Disconnected, user_id);
    record_disconnect(&state, user_id, &format!("connection {connection_id}")).await;

    tracing::info!(
        user_id,
        connection_id = %connection_id,
        state = ?lifecycle,
        "WebSocket actor stopped"
    );
}

fn transition(from: ConnectionState, to: ConnectionState, user_id: UserId) -> ConnectionState {
    tracing::debug!(user_id, ?from, ?to, "Connection state change");
    to
}

/// Initial roster: unread counts per sender. Skipped if the store fails.
async fn send_unread_counts(state: &AppState, user_id: UserId, handle: &ConnectionHandle) {
    match state.gateway.run(move |store| store.unread_counts(user_id)).await {
        Ok(counts) => {
            let counts: BTreeMap<String, u64> = counts
                .into_iter()
                .map(|(sender, n)| (sender.to_string(), n))
                .collect();
            handle.send_json(&ServerFrame::UnreadCounts { counts });
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Failed to load unread counts");
        }
    }
}

/// Audit a disconnect under the last known identity.
pub async fn record_disconnect(state: &AppState, user_id: UserId, details: &str) {
    record_event(state, user_id, "disconnected", details.to_string()).await;
}

async fn record_event(state: &AppState, user_id: UserId, action: &'static str, details: String) {
    if let Err(e) = state
        .gateway
        .run(move |store| store.append_server_event(user_id, action, &details))
        .await
    {
        tracing::warn!(user_id, action, error = %e, "Failed to append server event");
    }
}

/// Ping task: sends periodic pings and closes the socket if no pong arrives in time.
async fn ping_task(
    tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    heartbeat: Heartbeat,
) {
    let mut ping_timer = interval(heartbeat.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(heartbeat.pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
