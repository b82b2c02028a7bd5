//! Database row types for all tables.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Opaque user identity. Only positive values are admitted.
pub type UserId = i64;

/// Server-assigned message identity.
pub type MessageId = i64;

/// Returns true when `user` may be admitted to the registry.
pub fn is_valid_user_id(user: UserId) -> bool {
    user > 0
}

/// Message record in the messages table.
///
/// Serialized as-is into outbound `message`, `message_sent` and
/// `message_edited` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub reply_to: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub edited: bool,
}

/// Fields supplied by the caller when inserting a message.
/// The store assigns `id` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub reply_to: Option<MessageId>,
}

impl NewMessage {
    /// A message needs text or an attached file.
    pub fn has_payload(&self) -> bool {
        !self.content.is_empty() || self.file_path.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Online-status row in the user_status table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatus {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Audit record in the server_events table (append-only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub user_id: UserId,
    pub action: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}
