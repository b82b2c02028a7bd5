//! SQLite-backed gateway.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;

use super::{PersistenceGateway, StorageError};
use crate::db::models::{Message, MessageId, NewMessage, UserId, UserStatus};
use crate::db::DbPool;

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, file_name, file_path, \
                               reply_to_id, timestamp, is_read, edited";

/// Gateway over the shared rusqlite connection.
#[derive(Clone)]
pub struct SqliteGateway {
    db: DbPool,
}

impl SqliteGateway {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, StorageError> {
        self.db.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender: row.get(1)?,
        receiver: row.get(2)?,
        content: row.get(3)?,
        file_name: row.get(4)?,
        file_path: row.get(5)?,
        reply_to: row.get(6)?,
        timestamp: row.get(7)?,
        is_read: row.get(8)?,
        edited: row.get(9)?,
    })
}

fn select_message(
    conn: &rusqlite::Connection,
    id: MessageId,
) -> Result<Option<Message>, StorageError> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], message_from_row)
        .optional()?)
}

impl PersistenceGateway for SqliteGateway {
    fn unread_counts(&self, user: UserId) -> Result<HashMap<UserId, u64>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT sender_id, COUNT(*) FROM messages
             WHERE receiver_id = ?1 AND is_read = 0
             GROUP BY sender_id",
        )?;
        let counts = stmt
            .query_map(params![user], |row| {
                Ok((row.get::<_, UserId>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(counts)
    }

    fn insert_message(&self, message: NewMessage) -> Result<Message, StorageError> {
        let conn = self.conn()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO messages (sender_id, receiver_id, content, file_name, file_path, reply_to_id, timestamp, is_read, edited)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0)",
            params![
                message.sender,
                message.receiver,
                message.content,
                message.file_name,
                message.file_path,
                message.reply_to,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        select_message(&conn, id)?.ok_or_else(|| StorageError::NotFound(format!("message {id}")))
    }

    fn message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let conn = self.conn()?;
        select_message(&conn, id)
    }

    fn update_message_content(
        &self,
        id: MessageId,
        content: &str,
    ) -> Result<Option<Message>, StorageError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE messages SET content = ?1, edited = 1 WHERE id = ?2",
            params![content, id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        select_message(&conn, id)
    }

    fn delete_message(&self, id: MessageId) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn mark_read(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let conn = self.conn()?;
        let changed = conn.execute("UPDATE messages SET is_read = 1 WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Ok(None);
        }
        select_message(&conn, id)
    }

    fn set_user_online(&self, user: UserId, at: DateTime<Utc>) -> Result<(), StorageError> {
        upsert_status(&*self.conn()?, user, true, at)
    }

    fn set_user_offline(&self, user: UserId, at: DateTime<Utc>) -> Result<(), StorageError> {
        upsert_status(&*self.conn()?, user, false, at)
    }

    fn user_status(&self, user: UserId) -> Result<Option<UserStatus>, StorageError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT user_id, is_online, last_seen FROM user_status WHERE user_id = ?1",
                params![user],
                |row| {
                    Ok(UserStatus {
                        user_id: row.get(0)?,
                        is_online: row.get(1)?,
                        last_seen: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn append_server_event(
        &self,
        user: UserId,
        action: &str,
        details: &str,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO server_events (user_id, action, details, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![user, action, details, Utc::now()],
        )?;
        Ok(())
    }
}

fn upsert_status(
    conn: &rusqlite::Connection,
    user: UserId,
    online: bool,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO user_status (user_id, is_online, last_seen) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET is_online = excluded.is_online, last_seen = excluded.last_seen",
        params![user, online, at],
    )?;
    Ok(())
}
