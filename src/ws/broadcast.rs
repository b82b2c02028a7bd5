use axum::extract::ws::Message;

use super::protocol::ServerFrame;
use super::{ConnectionHandle, ConnectionRegistry};
use crate::db::models::UserId;

fn encode(frame: &ServerFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode outbound frame");
            None
        }
    }
}

/// Push one encoded message to each handle. A handle whose connection
/// vanished since the snapshot just drops its copy. Returns deliveries.
fn fan_out(connections: &[ConnectionHandle], frame: &ServerFrame) -> usize {
    let Some(msg) = encode(frame) else {
        return 0;
    };
    connections
        .iter()
        .filter(|conn| conn.send_message(msg.clone()))
        .count()
}

/// Broadcast a frame to all connected users.
pub fn broadcast_to_all(registry: &ConnectionRegistry, frame: &ServerFrame) -> usize {
    fan_out(&registry.all_connections(), frame)
}

/// Send a frame to a specific user (all their connections).
pub fn send_to_user(registry: &ConnectionRegistry, user: UserId, frame: &ServerFrame) -> usize {
    fan_out(&registry.connections_for(user), frame)
}

/// Send a frame to each listed user once, even if a user appears twice.
pub fn send_to_users(registry: &ConnectionRegistry, users: &[UserId], frame: &ServerFrame) -> usize {
    let mut seen = Vec::with_capacity(users.len());
    let mut delivered = 0;
    for &user in users {
        if seen.contains(&user) {
            continue;
        }
        seen.push(user);
        delivered += send_to_user(registry, user, frame);
    }
    delivered
}
