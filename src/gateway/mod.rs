//! Persistence Gateway: the durable store behind the relay.
//!
//! The trait is synchronous. Async callers go through [`Gateway::run`],
//! which moves the call onto tokio's blocking pool so a slow store only
//! delays the connection that issued it.

#[cfg(test)]
pub(crate) mod failing;
pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::db::models::{Message, MessageId, NewMessage, UserId, UserStatus};

pub use memory::MemoryGateway;
pub use sqlite::SqliteGateway;

/// Failure of a single gateway call. Fatal to the current operation only.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("blocking worker failed: {0}")]
    Worker(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Operations the relay core needs from durable storage.
pub trait PersistenceGateway: Send + Sync {
    /// Unread message counts for `user`, keyed by sender.
    fn unread_counts(&self, user: UserId) -> Result<HashMap<UserId, u64>, StorageError>;

    /// Persist a new message. The store assigns id and timestamp.
    fn insert_message(&self, message: NewMessage) -> Result<Message, StorageError>;

    fn message(&self, id: MessageId) -> Result<Option<Message>, StorageError>;

    /// Replace the content of a message and flag it as edited.
    /// Returns `None` if the message does not exist.
    fn update_message_content(
        &self,
        id: MessageId,
        content: &str,
    ) -> Result<Option<Message>, StorageError>;

    fn delete_message(&self, id: MessageId) -> Result<(), StorageError>;

    /// Mark a message read. Returns `None` if the message does not exist.
    fn mark_read(&self, id: MessageId) -> Result<Option<Message>, StorageError>;

    /// Idempotent upsert of the online flag and last-seen time.
    fn set_user_online(&self, user: UserId, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Idempotent upsert of the offline flag and last-seen time.
    fn set_user_offline(&self, user: UserId, at: DateTime<Utc>) -> Result<(), StorageError>;

    fn user_status(&self, user: UserId) -> Result<Option<UserStatus>, StorageError>;

    /// Append an audit record. Write-only from the core's point of view.
    fn append_server_event(
        &self,
        user: UserId,
        action: &str,
        details: &str,
    ) -> Result<(), StorageError>;
}

/// Which backend the process persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend {other:?}")),
        }
    }
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

/// Shared handle to the configured gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<dyn PersistenceGateway>,
}

impl Gateway {
    pub fn new(inner: Arc<dyn PersistenceGateway>) -> Self {
        Self { inner }
    }

    /// Run a gateway call on the blocking pool and await its result.
    pub async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PersistenceGateway) -> Result<T, StorageError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(inner.as_ref()))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))?
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl From<MemoryGateway> for Gateway {
    fn from(store: MemoryGateway) -> Self {
        Self::new(Arc::new(store))
    }
}

impl From<SqliteGateway> for Gateway {
    fn from(store: SqliteGateway) -> Self {
        Self::new(Arc::new(store))
    }
}

/// Build the gateway for the configured backend.
pub fn create_gateway(
    backend: StorageBackend,
    data_dir: &str,
) -> Result<Gateway, Box<dyn std::error::Error>> {
    match backend {
        StorageBackend::Sqlite => {
            let db = crate::db::init_db(data_dir)?;
            Ok(SqliteGateway::new(db).into())
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; messages are lost on restart");
            Ok(MemoryGateway::new().into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parses_from_config_names() {
        for backend in [StorageBackend::Sqlite, StorageBackend::Memory] {
            assert_eq!(backend.as_str().parse::<StorageBackend>(), Ok(backend));
        }
        assert!("redis".parse::<StorageBackend>().is_err());
    }
}
