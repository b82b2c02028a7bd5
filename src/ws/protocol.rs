//! JSON frame protocol.
//!
//! Every frame is an object with a `type` discriminant. Inbound frames decode
//! into [`ClientFrame`]; outbound frames are built from [`ServerFrame`].

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::db::models::{Message, MessageId, UserId};

/// Reply sent when a frame body is not JSON at all.
pub const INVALID_JSON: &str = "Invalid JSON";

/// Inbound operations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message(SendMessage),
    Delete(DeleteMessage),
    Edit(EditMessage),
    Typing(TypingTarget),
    StopTyping(TypingTarget),
    Read(ReadReceipt),
    Presence(PresenceStatusUpdate),
    GetPresence,
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Delete(_) => "delete",
            Self::Edit(_) => "edit",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
            Self::Read(_) => "read",
            Self::Presence(_) => "presence",
            Self::GetPresence => "get_presence",
        }
    }
}

const KNOWN_TYPES: &[&str] = &[
    "message",
    "delete",
    "edit",
    "typing",
    "stop_typing",
    "read",
    "presence",
    "get_presence",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendMessage {
    #[serde(deserialize_with = "de_id")]
    pub to: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeleteMessage {
    #[serde(rename = "file_id", alias = "message_id", alias = "id", deserialize_with = "de_id")]
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditMessage {
    #[serde(alias = "id", deserialize_with = "de_id")]
    pub message_id: MessageId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypingTarget {
    #[serde(deserialize_with = "de_id")]
    pub to: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadReceipt {
    #[serde(alias = "id", deserialize_with = "de_id")]
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceStatusUpdate {
    pub status: String,
}

/// Outbound frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Unread counts keyed by sender id, sent once on admission.
    UnreadCounts { counts: BTreeMap<String, u64> },
    Message(Message),
    MessageSent(Message),
    MessageEdited(Message),
    MessageDeleted { id: MessageId },
    Typing { from: UserId, is_typing: bool },
    MessageRead { message_id: MessageId, reader: UserId },
    Presence { user: UserId, status: String },
    PresenceList { users: Vec<UserId> },
}

/// The only client-visible failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReply {
    pub error: String,
}

impl ErrorReply {
    pub fn invalid_json() -> Self {
        Self {
            error: INVALID_JSON.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not valid JSON")]
    InvalidJson,

    #[error("frame has no type discriminant")]
    MissingType,

    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("malformed {kind} frame: {reason}")]
    Malformed { kind: String, reason: String },
}

/// Decode one inbound text frame.
///
/// Only `FrameError::InvalidJson` warrants a reply; the other errors mean
/// the operation is dropped.
pub fn decode_frame(text: &str) -> Result<ClientFrame, FrameError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| FrameError::InvalidJson)?;

    let kind = match value.get("type").and_then(|t| t.as_str()) {
        Some(kind) => kind.to_string(),
        None => return Err(FrameError::MissingType),
    };
    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(FrameError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| FrameError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

/// Accept ids as JSON integers or numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn into_id<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            RawId::Int(id) => Ok(id),
            RawId::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("non-numeric id {s:?}"))),
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    RawId::deserialize(deserializer)?.into_id()
}

fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Option::<RawId>::deserialize(deserializer)?
        .map(RawId::into_id)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_decode_message() {
        let frame = decode_frame(r#"{"type":"message","to":7,"content":"hi"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message(SendMessage {
                to: 7,
                content: "hi".to_string(),
                file_name: None,
                file_path: None,
                reply_to: None,
            })
        );
    }

    #[test]
    fn test_decode_accepts_numeric_strings() {
        let frame =
            decode_frame(r#"{"type":"message","to":"7","content":"hi","reply_to":"3"}"#).unwrap();
        match frame {
            ClientFrame::Message(m) => {
                assert_eq!(m.to, 7);
                assert_eq!(m.reply_to, Some(3));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_decode_delete_aliases() {
        for body in [
            r#"{"type":"delete","file_id":42}"#,
            r#"{"type":"delete","message_id":42}"#,
            r#"{"type":"delete","id":"42"}"#,
        ] {
            assert_eq!(
                decode_frame(body).unwrap(),
                ClientFrame::Delete(DeleteMessage { message_id: 42 })
            );
        }
    }

    #[test]
    fn test_decode_unit_and_typing_frames() {
        assert_eq!(
            decode_frame(r#"{"type":"get_presence"}"#).unwrap(),
            ClientFrame::GetPresence
        );
        assert_eq!(
            decode_frame(r#"{"type":"stop_typing","to":4}"#).unwrap(),
            ClientFrame::StopTyping(TypingTarget { to: 4 })
        );
    }

    #[test]
    fn test_invalid_json() {
        assert_eq!(decode_frame("not-json"), Err(FrameError::InvalidJson));
        assert_eq!(decode_frame(""), Err(FrameError::InvalidJson));
    }

    #[test]
    fn test_missing_and_unknown_type() {
        assert_eq!(decode_frame(r#"{"to":7}"#), Err(FrameError::MissingType));
        assert_eq!(decode_frame("[1,2]"), Err(FrameError::MissingType));
        assert_eq!(
            decode_frame(r#"{"type":"register","id":5}"#),
            Err(FrameError::UnknownType("register".to_string()))
        );
    }

    #[test]
    fn test_non_numeric_id_is_malformed() {
        match decode_frame(r#"{"type":"typing","to":"bob"}"#) {
            Err(FrameError::Malformed { kind, .. }) => assert_eq!(kind, "typing"),
            other => panic!("expected malformed, got {other:?}"),
        }
        assert!(matches!(
            decode_frame(r#"{"type":"edit","message_id":1}"#),
            Err(FrameError::Malformed { .. })
        ));
    }

    #[test]
    fn test_server_frame_shapes() {
        let msg = Message {
            id: 1,
            sender: 5,
            receiver: 7,
            content: "hi".to_string(),
            file_name: None,
            file_path: None,
            reply_to: None,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            is_read: false,
            edited: false,
        };
        let value = serde_json::to_value(ServerFrame::MessageSent(msg)).unwrap();
        assert_eq!(value["type"], "message_sent");
        assert_eq!(value["sender"], 5);
        assert_eq!(value["receiver"], 7);
        assert_eq!(value["timestamp"], "2026-01-02T03:04:05Z");

        let value = serde_json::to_value(ServerFrame::Typing {
            from: 5,
            is_typing: true,
        })
        .unwrap();
        assert_eq!(value, json!({"type": "typing", "from": 5, "is_typing": true}));

        let value = serde_json::to_value(ErrorReply::invalid_json()).unwrap();
        assert_eq!(value, json!({"error": "Invalid JSON"}));
    }
}
