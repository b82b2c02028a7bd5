use std::time::Duration;

use crate::chat::presence::PresenceTracker;
use crate::gateway::Gateway;
use crate::ws::ConnectionRegistry;

/// Ping cadence for each connection's heartbeat task.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
///
/// Owned and injected rather than global: two states never share a registry.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Durable store, called off the async workers
    pub gateway: Gateway,
    /// Active WebSocket connections per user
    pub connections: ConnectionRegistry,
    /// Presence edges derived from `connections`
    pub presence: PresenceTracker,
    pub heartbeat: Heartbeat,
}

impl AppState {
    pub fn new(gateway: Gateway, broadcast_offline: bool) -> Self {
        let connections = ConnectionRegistry::new();
        let presence = PresenceTracker::new(connections.clone(), gateway.clone(), broadcast_offline);
        Self {
            gateway,
            connections,
            presence,
            heartbeat: Heartbeat::default(),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}
