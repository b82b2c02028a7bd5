//! Test double: a memory store whose chosen operations fail.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use super::{MemoryGateway, PersistenceGateway, StorageError};
use crate::db::models::{Message, MessageId, NewMessage, UserId, UserStatus};

/// Delegates to `inner` except for the operations named in `failing`,
/// which return a database error without touching `inner`.
#[derive(Clone)]
pub struct FailingGateway {
    pub inner: MemoryGateway,
    failing: HashSet<&'static str>,
}

impl FailingGateway {
    pub fn new(inner: MemoryGateway, failing: &[&'static str]) -> Self {
        Self {
            inner,
            failing: failing.iter().copied().collect(),
        }
    }

    fn check(&self, op: &'static str) -> Result<(), StorageError> {
        if self.failing.contains(op) {
            return Err(StorageError::Database(rusqlite::Error::InvalidQuery));
        }
        Ok(())
    }
}

impl PersistenceGateway for FailingGateway {
    fn unread_counts(&self, user: UserId) -> Result<HashMap<UserId, u64>, StorageError> {
        self.check("unread_counts")?;
        self.inner.unread_counts(user)
    }

    fn insert_message(&self, message: NewMessage) -> Result<Message, StorageError> {
        self.check("insert_message")?;
        self.inner.insert_message(message)
    }

    fn message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        self.check("message")?;
        self.inner.message(id)
    }

    fn update_message_content(
        &self,
        id: MessageId,
        content: &str,
    ) -> Result<Option<Message>, StorageError> {
        self.check("update_message_content")?;
        self.inner.update_message_content(id, content)
    }

    fn delete_message(&self, id: MessageId) -> Result<(), StorageError> {
        self.check("delete_message")?;
        self.inner.delete_message(id)
    }

    fn mark_read(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        self.check("mark_read")?;
        self.inner.mark_read(id)
    }

    fn set_user_online(&self, user: UserId, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.check("set_user_online")?;
        self.inner.set_user_online(user, at)
    }

    fn set_user_offline(&self, user: UserId, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.check("set_user_offline")?;
        self.inner.set_user_offline(user, at)
    }

    fn user_status(&self, user: UserId) -> Result<Option<UserStatus>, StorageError> {
        self.check("user_status")?;
        self.inner.user_status(user)
    }

    fn append_server_event(
        &self,
        user: UserId,
        action: &str,
        details: &str,
    ) -> Result<(), StorageError> {
        self.check("append_server_event")?;
        self.inner.append_server_event(user, action, details)
    }
}

impl From<FailingGateway> for super::Gateway {
    fn from(store: FailingGateway) -> Self {
        Self::new(std::sync::Arc::new(store))
    }
}
