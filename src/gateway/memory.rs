//! In-memory gateway for development and tests.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::{PersistenceGateway, StorageError};
use crate::db::models::{Message, MessageId, NewMessage, ServerEvent, UserId, UserStatus};

#[derive(Debug, Default)]
struct Tables {
    next_message_id: MessageId,
    messages: BTreeMap<MessageId, Message>,
    statuses: HashMap<UserId, UserStatus>,
    events: Vec<ServerEvent>,
}

/// HashMap-backed store. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit log, oldest first.
    pub fn server_events(&self) -> Vec<ServerEvent> {
        self.tables
            .read()
            .map(|t| t.events.clone())
            .unwrap_or_default()
    }

    pub fn message_count(&self) -> usize {
        self.tables.read().map(|t| t.messages.len()).unwrap_or(0)
    }
}

impl PersistenceGateway for MemoryGateway {
    fn unread_counts(&self, user: UserId) -> Result<HashMap<UserId, u64>, StorageError> {
        let tables = self.tables.read().map_err(|_| StorageError::Poisoned)?;
        let mut counts = HashMap::new();
        for message in tables
            .messages
            .values()
            .filter(|m| m.receiver == user && !m.is_read)
        {
            *counts.entry(message.sender).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn insert_message(&self, message: NewMessage) -> Result<Message, StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        tables.next_message_id += 1;
        let record = Message {
            id: tables.next_message_id,
            sender: message.sender,
            receiver: message.receiver,
            content: message.content,
            file_name: message.file_name,
            file_path: message.file_path,
            reply_to: message.reply_to,
            timestamp: Utc::now(),
            is_read: false,
            edited: false,
        };
        tables.messages.insert(record.id, record.clone());
        Ok(record)
    }

    fn message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let tables = self.tables.read().map_err(|_| StorageError::Poisoned)?;
        Ok(tables.messages.get(&id).cloned())
    }

    fn update_message_content(
        &self,
        id: MessageId,
        content: &str,
    ) -> Result<Option<Message>, StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        Ok(tables.messages.get_mut(&id).map(|m| {
            m.content = content.to_string();
            m.edited = true;
            m.clone()
        }))
    }

    fn delete_message(&self, id: MessageId) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        tables.messages.remove(&id);
        Ok(())
    }

    fn mark_read(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        Ok(tables.messages.get_mut(&id).map(|m| {
            m.is_read = true;
            m.clone()
        }))
    }

    fn set_user_online(&self, user: UserId, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        tables.statuses.insert(
            user,
            UserStatus {
                user_id: user,
                is_online: true,
                last_seen: at,
            },
        );
        Ok(())
    }

    fn set_user_offline(&self, user: UserId, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        tables.statuses.insert(
            user,
            UserStatus {
                user_id: user,
                is_online: false,
                last_seen: at,
            },
        );
        Ok(())
    }

    fn user_status(&self, user: UserId) -> Result<Option<UserStatus>, StorageError> {
        let tables = self.tables.read().map_err(|_| StorageError::Poisoned)?;
        Ok(tables.statuses.get(&user).cloned())
    }

    fn append_server_event(
        &self,
        user: UserId,
        action: &str,
        details: &str,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        tables.events.push(ServerEvent {
            user_id: user,
            action: action.to_string(),
            details: details.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
