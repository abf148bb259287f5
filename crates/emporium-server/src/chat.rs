//! Chat-service collaborator: room authorization and message persistence.
//!
//! The hub never decides who may speak in a room; it asks a [`ChatService`]
//! and fans out whatever the service accepted.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::ChatError;
use crate::ids::{RoomId, UserId};

/// Longest accepted message body, in characters.
pub const MAX_BODY_CHARS: usize = 4000;

/// Default number of messages retained per room.
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// A message accepted and stored by the chat service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Stored message id.
    pub id: String,
    /// Room the message belongs to.
    pub room: RoomId,
    /// Author.
    pub from: UserId,
    /// Message text.
    pub body: String,
    /// Time of storage.
    pub sent_at: DateTime<Utc>,
}

/// Authorization and persistence for room traffic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Authorize `sender` in `room` and persist the message.
    async fn post_message(
        &self,
        sender: &UserId,
        room: &RoomId,
        body: &str,
    ) -> Result<ChatMessage, ChatError>;

    /// Decide whether `user` may join `room`.
    async fn authorize_join(&self, user: &UserId, room: &RoomId) -> Result<(), ChatError>;

    /// Rooms a newly connected session of `user` is joined to automatically.
    async fn rooms_for_user(&self, user: &UserId) -> Result<Vec<RoomId>, ChatError>;
}

#[derive(Debug, Default)]
struct Room {
    open: bool,
    members: HashSet<UserId>,
    history: VecDeque<ChatMessage>,
}

/// Process-local chat service with bounded per-room history.
///
/// Open rooms admit anyone who asks to join; closed rooms only their listed
/// members. With `auto_create`, joining an unknown room creates it open.
#[derive(Debug)]
pub struct InMemoryChatService {
    rooms: RwLock<HashMap<RoomId, Room>>,
    auto_create: bool,
    history_limit: usize,
}

impl InMemoryChatService {
    /// Create an empty service.
    pub fn new(auto_create: bool) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            auto_create,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Override how many messages each room keeps.
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Create (or reset the openness of) a room with an initial member list.
    pub fn create_room(&self, room: RoomId, open: bool, members: impl IntoIterator<Item = UserId>) {
        let mut rooms = self.rooms.write();
        let entry = rooms.entry(room).or_default();
        entry.open = open;
        entry.members.extend(members);
    }

    /// Add a member to an existing room. Returns `false` if the room is unknown.
    pub fn add_member(&self, room: &RoomId, user: UserId) -> bool {
        match self.rooms.write().get_mut(room) {
            Some(entry) => {
                let _ = entry.members.insert(user);
                true
            }
            None => false,
        }
    }

    /// Retained messages for a room, oldest first.
    pub fn history(&self, room: &RoomId) -> Vec<ChatMessage> {
        self.rooms
            .read()
            .get(room)
            .map(|r| r.history.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryChatService {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl ChatService for InMemoryChatService {
    async fn post_message(
        &self,
        sender: &UserId,
        room: &RoomId,
        body: &str,
    ) -> Result<ChatMessage, ChatError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::Invalid("empty body".into()));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(ChatError::Invalid(format!(
                "body exceeds {MAX_BODY_CHARS} characters"
            )));
        }

        let mut rooms = self.rooms.write();
        let entry = rooms.get_mut(room).ok_or(ChatError::NotFound)?;
        if !entry.members.contains(sender) {
            return Err(ChatError::Forbidden);
        }

        let message = ChatMessage {
            id: format!("msg_{}", Uuid::now_v7()),
            room: room.clone(),
            from: sender.clone(),
            body: body.to_string(),
            sent_at: Utc::now(),
        };
        entry.history.push_back(message.clone());
        while entry.history.len() > self.history_limit {
            let _ = entry.history.pop_front();
        }
        Ok(message)
    }

    async fn authorize_join(&self, user: &UserId, room: &RoomId) -> Result<(), ChatError> {
        let mut rooms = self.rooms.write();
        if self.auto_create && !rooms.contains_key(room) {
            debug!(%room, "creating room on first join");
            let _ = rooms.insert(
                room.clone(),
                Room {
                    open: true,
                    ..Room::default()
                },
            );
        }
        let entry = rooms.get_mut(room).ok_or(ChatError::NotFound)?;
        if entry.members.contains(user) {
            return Ok(());
        }
        if !entry.open {
            return Err(ChatError::Forbidden);
        }
        let _ = entry.members.insert(user.clone());
        Ok(())
    }

    async fn rooms_for_user(&self, user: &UserId) -> Result<Vec<RoomId>, ChatError> {
        let mut rooms: Vec<RoomId> = self
            .rooms
            .read()
            .iter()
            .filter(|(_, r)| r.members.contains(user))
            .map(|(id, _)| id.clone())
            .collect();
        rooms.sort();
        Ok(rooms)
    }
}
