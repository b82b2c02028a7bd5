//! Per-connection message router.
//!
//! Decodes inbound frames, validates them, runs the durable side effect
//! through the gateway, and fans results out via the registry. Every failure
//! is contained to the frame that caused it. Only an unparseable body is
//! answered (`{"error": "Invalid JSON"}`); authorization failures and
//! malformed operations are dropped without a reply, so a caller learns
//! nothing about other users' messages.

use crate::db::models::{is_valid_user_id, Message, MessageId, NewMessage, UserId};
use crate::gateway::StorageError;
use crate::state::AppState;
use crate::ws::broadcast::{send_to_user, send_to_users};
use crate::ws::protocol::{
    decode_frame, ClientFrame, DeleteMessage, EditMessage, ErrorReply, FrameError, ReadReceipt,
    SendMessage, ServerFrame,
};
use crate::ws::ConnectionHandle;

/// Maximum message content length (chars).
pub const MAX_CONTENT_LENGTH: usize = 4000;

/// Maximum custom presence status length (chars).
pub const MAX_STATUS_LENGTH: usize = 64;

/// What a single frame produced. Used for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation ran and emitted `deliveries` frames.
    Handled { deliveries: usize },
    /// The operation was dropped without side effects.
    Dropped(&'static str),
    /// The body was not JSON; the caller got an error reply.
    Rejected,
}

/// Router bound to one admitted connection.
pub struct MessageRouter {
    state: AppState,
    user_id: UserId,
    origin: ConnectionHandle,
}

impl MessageRouter {
    pub fn new(state: AppState, user_id: UserId, origin: ConnectionHandle) -> Self {
        Self {
            state,
            user_id,
            origin,
        }
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&self, text: &str) -> Outcome {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(FrameError::InvalidJson) => {
                tracing::debug!(user_id = self.user_id, "Rejecting non-JSON frame");
                self.origin.send_json(&ErrorReply::invalid_json());
                return Outcome::Rejected;
            }
            Err(e) => {
                tracing::debug!(user_id = self.user_id, error = %e, "Dropping frame");
                return Outcome::Dropped("undecodable");
            }
        };

        let kind = frame.kind();
        match self.dispatch(frame).await {
            Ok(outcome) => {
                if let Outcome::Dropped(reason) = &outcome {
                    tracing::debug!(user_id = self.user_id, kind, reason, "Operation dropped");
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(user_id = self.user_id, kind, error = %e, "Operation failed");
                Outcome::Dropped("storage failure")
            }
        }
    }

    /// Dispatch a decoded frame to its handler.
    pub async fn dispatch(&self, frame: ClientFrame) -> Result<Outcome, StorageError> {
        match frame {
            ClientFrame::Message(m) => self.send_message(m).await,
            ClientFrame::Delete(d) => self.delete_message(d).await,
            ClientFrame::Edit(e) => self.edit_message(e).await,
            ClientFrame::Typing(t) => Ok(self.typing(t.to, true)),
            ClientFrame::StopTyping(t) => Ok(self.typing(t.to, false)),
            ClientFrame::Read(r) => self.mark_read(r).await,
            ClientFrame::Presence(p) => Ok(self.set_status(&p.status)),
            ClientFrame::GetPresence => Ok(self.send_roster()),
        }
    }

    async fn send_message(&self, req: SendMessage) -> Result<Outcome, StorageError> {
        if !is_valid_user_id(req.to) {
            return Ok(Outcome::Dropped("invalid recipient"));
        }
        let content = req.content.trim().to_string();
        if content.chars().count() > MAX_CONTENT_LENGTH {
            return Ok(Outcome::Dropped("content too long"));
        }

        let new = NewMessage {
            sender: self.user_id,
            receiver: req.to,
            content,
            file_name: req.file_name.filter(|s| !s.is_empty()),
            file_path: req.file_path.filter(|s| !s.is_empty()),
            reply_to: req.reply_to,
        };
        if !new.has_payload() {
            return Ok(Outcome::Dropped("empty message"));
        }

        let message = self
            .state
            .gateway
            .run(move |store| store.insert_message(new))
            .await?;

        tracing::debug!(
            user_id = self.user_id,
            message_id = message.id,
            receiver = message.receiver,
            "Message persisted"
        );

        let registry = &self.state.connections;
        let mut deliveries = send_to_user(
            registry,
            message.receiver,
            &ServerFrame::Message(message.clone()),
        );
        deliveries += send_to_user(registry, self.user_id, &ServerFrame::MessageSent(message));
        Ok(Outcome::Handled { deliveries })
    }

    /// Fetch a message the caller sent, or `None` if it is missing or not theirs.
    async fn owned_message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let message = self.state.gateway.run(move |store| store.message(id)).await?;
        Ok(message.filter(|m| m.sender == self.user_id))
    }

    async fn delete_message(&self, req: DeleteMessage) -> Result<Outcome, StorageError> {
        let Some(message) = self.owned_message(req.message_id).await? else {
            return Ok(Outcome::Dropped("not owner or missing"));
        };

        let id = message.id;
        self.state
            .gateway
            .run(move |store| store.delete_message(id))
            .await?;

        let deliveries = send_to_users(
            &self.state.connections,
            &[message.receiver, self.user_id],
            &ServerFrame::MessageDeleted { id },
        );
        Ok(Outcome::Handled { deliveries })
    }

    async fn edit_message(&self, req: EditMessage) -> Result<Outcome, StorageError> {
        let content = req.content.trim().to_string();
        if content.is_empty() || content.chars().count() > MAX_CONTENT_LENGTH {
            return Ok(Outcome::Dropped("invalid content"));
        }
        let Some(message) = self.owned_message(req.message_id).await? else {
            return Ok(Outcome::Dropped("not owner or missing"));
        };

        let id = message.id;
        let updated = self
            .state
            .gateway
            .run(move |store| store.update_message_content(id, &content))
            .await?;
        let Some(updated) = updated else {
            // Deleted between the ownership check and the update.
            return Ok(Outcome::Dropped("not owner or missing"));
        };

        let deliveries = send_to_users(
            &self.state.connections,
            &[updated.receiver, self.user_id],
            &ServerFrame::MessageEdited(updated),
        );
        Ok(Outcome::Handled { deliveries })
    }

    fn typing(&self, to: UserId, is_typing: bool) -> Outcome {
        if !is_valid_user_id(to) {
            return Outcome::Dropped("invalid target");
        }
        let deliveries = send_to_user(
            &self.state.connections,
            to,
            &ServerFrame::Typing {
                from: self.user_id,
                is_typing,
            },
        );
        Outcome::Handled { deliveries }
    }

    async fn mark_read(&self, req: ReadReceipt) -> Result<Outcome, StorageError> {
        let id = req.message_id;
        let message = self.state.gateway.run(move |store| store.message(id)).await?;
        let Some(message) = message.filter(|m| m.receiver == self.user_id) else {
            return Ok(Outcome::Dropped("not recipient or missing"));
        };

        if !message.is_read {
            self.state.gateway.run(move |store| store.mark_read(id)).await?;
        }

        let deliveries = send_to_users(
            &self.state.connections,
            &[message.sender, self.user_id],
            &ServerFrame::MessageRead {
                message_id: id,
                reader: self.user_id,
            },
        );
        Ok(Outcome::Handled { deliveries })
    }

    fn set_status(&self, status: &str) -> Outcome {
        let status = status.trim();
        if status.is_empty() || status.chars().count() > MAX_STATUS_LENGTH {
            return Outcome::Dropped("invalid status");
        }
        Outcome::Handled {
            deliveries: self.state.presence.custom_status(self.user_id, status),
        }
    }

    fn send_roster(&self) -> Outcome {
        let users = self.state.presence.get_presence();
        let delivered = self.origin.send_json(&ServerFrame::PresenceList { users });
        Outcome::Handled {
            deliveries: usize::from(delivered),
        }
    }
}
