//! Application-level wire envelopes.
//!
//! Inbound frames carry `{"type"?, "room", "body"?}`; outbound frames are
//! one JSON object per logical message, tagged by `type`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::errors::EnvelopeError;
use crate::ids::{RoomId, SessionId, UserId};

/// A parsed client → server envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Post a message to a room.
    Message {
        /// Target room.
        room: RoomId,
        /// Message text.
        body: String,
    },
    /// Join a room.
    Join {
        /// Room to join.
        room: RoomId,
    },
    /// Leave a room.
    Leave {
        /// Room to leave.
        room: RoomId,
    },
    /// Ephemeral typing indicator.
    Typing {
        /// Room the sender is typing in.
        room: RoomId,
    },
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: Option<String>,
    room: RoomId,
    body: Option<String>,
}

impl Inbound {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let raw: RawInbound = serde_json::from_str(text)?;
        let room = raw.room;
        match raw.kind.as_deref().unwrap_or("message") {
            "message" => {
                let body = raw.body.ok_or(EnvelopeError::MissingBody)?;
                Ok(Self::Message { room, body })
            }
            "join" => Ok(Self::Join { room }),
            "leave" => Ok(Self::Leave { room }),
            "typing" => Ok(Self::Typing { room }),
            other => Err(EnvelopeError::UnknownType(other.to_string())),
        }
    }

    /// Parse a binary frame holding UTF-8 JSON.
    pub fn parse_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(data).map_err(|_| EnvelopeError::NotUtf8)?;
        Self::parse(text)
    }

    /// The room this envelope targets.
    pub fn room(&self) -> &RoomId {
        match self {
            Self::Message { room, .. }
            | Self::Join { room }
            | Self::Leave { room }
            | Self::Typing { room } => room,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Typing { .. } => "typing",
        }
    }
}

/// Payload of the first frame on every session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstablishedData {
    /// Server-assigned session id.
    pub session_id: SessionId,
    /// Authenticated owner.
    pub user_id: UserId,
}

/// A server → client envelope.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    /// Sent once, immediately after registration.
    #[serde(rename = "connection.established")]
    Established {
        /// Session identity.
        data: EstablishedData,
    },
    /// A delivered chat message.
    #[serde(rename = "message", rename_all = "camelCase")]
    Message {
        /// Room the message was posted to.
        room: RoomId,
        /// Stored message id.
        id: String,
        /// Sender.
        from: UserId,
        /// Message text.
        body: String,
        /// Time the message was stored.
        sent_at: DateTime<Utc>,
    },
    /// Another member is typing.
    #[serde(rename = "typing")]
    Typing {
        /// Room.
        room: RoomId,
        /// Typing user.
        from: UserId,
    },
    /// Acknowledges a successful join.
    #[serde(rename = "room.joined")]
    Joined {
        /// Joined room.
        room: RoomId,
    },
    /// Acknowledges a leave.
    #[serde(rename = "room.left")]
    Left {
        /// Left room.
        room: RoomId,
    },
}

impl Outbound {
    /// Envelope for a stored chat message.
    pub fn message(msg: &ChatMessage) -> Self {
        Self::Message {
            room: msg.room.clone(),
            id: msg.id.clone(),
            from: msg.from.clone(),
            body: msg.body.clone(),
            sent_at: msg.sent_at,
        }
    }

    /// Serialize into a shareable text frame.
    pub fn to_frame(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}
