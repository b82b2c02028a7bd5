//! Server-side presence tracking and broadcast.
//!
//! Presence is derived from registry population edges: a user's first
//! connection makes them online, their last disconnect makes them offline.
//! Both edges persist last-seen through the gateway. Only the online edge
//! is broadcast unless `broadcast_offline` is enabled.
//!
//! There is no lock spanning "registry edge" and "persist status". A user
//! reconnecting while their offline write is in flight can end up with a
//! duplicate or reordered status row; both upserts are idempotent and the
//! next edge corrects it.

use chrono::Utc;

use crate::db::models::UserId;
use crate::gateway::Gateway;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::ServerFrame;
use crate::ws::ConnectionRegistry;

/// Presence status values for registry transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Transient presence change, never stored beyond last-seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEvent {
    pub user: UserId,
    pub status: PresenceStatus,
}

impl From<PresenceEvent> for ServerFrame {
    fn from(event: PresenceEvent) -> Self {
        ServerFrame::Presence {
            user: event.user,
            status: event.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    registry: ConnectionRegistry,
    gateway: Gateway,
    broadcast_offline: bool,
}

impl PresenceTracker {
    pub fn new(registry: ConnectionRegistry, gateway: Gateway, broadcast_offline: bool) -> Self {
        Self {
            registry,
            gateway,
            broadcast_offline,
        }
    }

    /// Handle the result of `ConnectionRegistry::admit`.
    /// Returns the event broadcast, if any.
    pub async fn user_admitted(&self, user: UserId, first: bool) -> Option<PresenceEvent> {
        if !first {
            return None;
        }

        let now = Utc::now();
        if let Err(e) = self
            .gateway
            .run(move |store| store.set_user_online(user, now))
            .await
        {
            tracing::warn!(user_id = user, error = %e, "Failed to persist online status");
        }

        let event = PresenceEvent {
            user,
            status: PresenceStatus::Online,
        };
        let delivered = broadcast_to_all(&self.registry, &event.into());
        tracing::info!(user_id = user, delivered, "User online");
        Some(event)
    }

    /// Handle the result of `ConnectionRegistry::remove`.
    /// Returns the event broadcast, if any.
    pub async fn user_removed(&self, user: UserId, last: bool) -> Option<PresenceEvent> {
        if !last {
            return None;
        }

        let now = Utc::now();
        if let Err(e) = self
            .gateway
            .run(move |store| store.set_user_offline(user, now))
            .await
        {
            tracing::warn!(user_id = user, error = %e, "Failed to persist offline status");
        }
        tracing::info!(user_id = user, "User offline");

        if !self.broadcast_offline {
            return None;
        }
        let event = PresenceEvent {
            user,
            status: PresenceStatus::Offline,
        };
        broadcast_to_all(&self.registry, &event.into());
        Some(event)
    }

    /// Broadcast a client-chosen status (e.g. "away") to every connection.
    pub fn custom_status(&self, user: UserId, status: &str) -> usize {
        broadcast_to_all(
            &self.registry,
            &ServerFrame::Presence {
                user,
                status: status.to_string(),
            },
        )
    }

    /// Full roster of online users, ascending.
    pub fn get_presence(&self) -> Vec<UserId> {
        self.registry.online_users().into_iter().collect()
    }
}
