//! Process-wide registry of live sessions and room memberships.
//!
//! All registry state sits behind one mutex so register, unregister, join,
//! leave and the membership read inside broadcast see one consistent
//! snapshot. The lock guards in-memory map work only: it is never held
//! across an `.await`, a transport write or a log call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::connection::{Connection, FrameRead, FrameWrite};
use super::envelope::{EstablishedData, Inbound, Outbound};
use super::heartbeat::HeartbeatPolicy;
use super::mailbox::{self, Mailbox, MailboxReceiver, PushOutcome, DEFAULT_MAILBOX_CAPACITY};
use super::session::{self, ClientSession, SessionInfo};
use crate::chat::ChatService;
use crate::ids::{RoomId, SessionId, UserId};

/// Hub tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound mailbox slots per session.
    pub mailbox_capacity: usize,
    /// Inbound frames accepted per second per session (`0` disables).
    pub rate_limit_per_second: u32,
    /// Deadlines and ping cadence.
    pub heartbeat: HeartbeatPolicy,
    /// Deliver a sender's messages back to the sending session.
    pub echo_to_sender: bool,
    /// Kick a recipient after this many consecutive full-mailbox drops.
    pub max_consecutive_drops: Option<u64>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            rate_limit_per_second: 10,
            heartbeat: HeartbeatPolicy::default(),
            echo_to_sender: false,
            max_consecutive_drops: None,
        }
    }
}

/// Outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Room members the frame was offered to.
    pub recipients: usize,
    /// Frames queued.
    pub delivered: usize,
    /// Frames dropped because a mailbox was full or closed.
    pub dropped: usize,
    /// Slow consumers disconnected by drop escalation.
    pub kicked: usize,
}

#[derive(Debug)]
struct SessionEntry {
    user_id: UserId,
    mailbox: Mailbox,
    rooms: HashSet<RoomId>,
    connected_at: Instant,
}

#[derive(Debug, Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    rooms: HashMap<RoomId, HashSet<SessionId>>,
    /// Set by `close_all`; `accept` admits nothing afterwards.
    closing: bool,
}

impl Registry {
    /// Remove a session from every room it joined, then from the session map.
    fn remove_session(&mut self, id: &SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(id)?;
        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                let _ = members.remove(id);
                if members.is_empty() {
                    let _ = self.rooms.remove(room);
                }
            }
        }
        Some(entry)
    }
}

/// Connection hub shared by every upgrade handler.
pub struct Hub {
    chat: Arc<dyn ChatService>,
    config: HubConfig,
    registry: Mutex<Registry>,
}

impl Hub {
    /// Create a hub delegating authorization and persistence to `chat`.
    pub fn new(chat: Arc<dyn ChatService>, config: HubConfig) -> Self {
        Self {
            chat,
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    // ── Registry operations ─────────────────────────────────────────────

    /// Add a session with no room memberships; returns its mailbox reader.
    pub fn register(&self, info: &SessionInfo) -> MailboxReceiver {
        let (entry, rx) = self.new_entry(info);
        let _ = self.registry.lock().sessions.insert(info.id.clone(), entry);
        record_registered(info);
        rx
    }

    /// Like [`Hub::register`], but refuses once [`Hub::close_all`] has run.
    /// The check and the insert share one lock, so a session admitted here
    /// is always seen by a concurrent `close_all`.
    fn admit(&self, info: &SessionInfo) -> Option<MailboxReceiver> {
        let (entry, rx) = self.new_entry(info);
        {
            let mut reg = self.registry.lock();
            if reg.closing {
                return None;
            }
            let _ = reg.sessions.insert(info.id.clone(), entry);
        }
        record_registered(info);
        Some(rx)
    }

    fn new_entry(&self, info: &SessionInfo) -> (SessionEntry, MailboxReceiver) {
        let (tx, rx) = mailbox::mailbox(self.config.mailbox_capacity);
        let entry = SessionEntry {
            user_id: info.user_id.clone(),
            mailbox: tx,
            rooms: HashSet::new(),
            connected_at: Instant::now(),
        };
        (entry, rx)
    }

    /// Remove a session from every room and from the registry, closing its
    /// mailbox. Returns `false` if it was already gone.
    pub fn unregister(&self, id: &SessionId) -> bool {
        let removed = self.registry.lock().remove_session(id);
        let Some(entry) = removed else {
            debug!(session_id = %id, "unregister of unknown session ignored");
            return false;
        };

        counter!(crate::metrics::WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(crate::metrics::WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(crate::metrics::WS_CONNECTION_DURATION_SECONDS)
            .record(entry.connected_at.elapsed().as_secs_f64());
        info!(
            session_id = %id,
            user_id = %entry.user_id,
            rooms = entry.rooms.len(),
            dropped = entry.mailbox.dropped(),
            "session unregistered"
        );
        // Dropping the entry drops the only mailbox sender.
        drop(entry);
        true
    }

    /// Server-initiated disconnect; the session's outbound pump sends a close frame.
    pub fn kick(&self, id: &SessionId) -> bool {
        let kicked = self.unregister(id);
        if kicked {
            info!(session_id = %id, "session kicked");
        }
        kicked
    }

    /// Unregister every session and stop admitting new connections through
    /// [`Hub::accept`]. Returns how many were removed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = {
            let mut reg = self.registry.lock();
            reg.closing = true;
            reg.sessions.keys().cloned().collect()
        };
        let closed = ids.iter().filter(|id| self.unregister(id)).count();
        info!(closed, "closed all sessions");
        closed
    }

    /// Add a session to a room. Returns `false` if the session is not registered.
    pub fn join(&self, id: &SessionId, room: RoomId) -> bool {
        let mut reg = self.registry.lock();
        let Some(entry) = reg.sessions.get_mut(id) else {
            return false;
        };
        if entry.rooms.insert(room.clone()) {
            let _ = reg.rooms.entry(room).or_default().insert(id.clone());
        }
        true
    }

    /// Remove a session from a room. Returns `false` if it was not a member.
    pub fn leave(&self, id: &SessionId, room: &RoomId) -> bool {
        let mut reg = self.registry.lock();
        let Some(entry) = reg.sessions.get_mut(id) else {
            return false;
        };
        if !entry.rooms.remove(room) {
            return false;
        }
        if let Some(members) = reg.rooms.get_mut(room) {
            let _ = members.remove(id);
            if members.is_empty() {
                let _ = reg.rooms.remove(room);
            }
        }
        true
    }

    // ── Delivery ────────────────────────────────────────────────────────

    /// Offer `frame` to every member of `room` except `exclude`, without
    /// blocking. Full mailboxes drop the frame for that recipient only.
    pub fn broadcast(
        &self,
        room: &RoomId,
        frame: &Arc<str>,
        exclude: Option<&SessionId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut full: Vec<(SessionId, u64)> = Vec::new();
        let mut slow: Vec<SessionId> = Vec::new();
        {
            let mut reg = self.registry.lock();
            let Registry { sessions, rooms, .. } = &mut *reg;
            let Some(members) = rooms.get(room) else {
                return report;
            };
            for sid in members {
                if exclude == Some(sid) {
                    continue;
                }
                let Some(entry) = sessions.get_mut(sid) else {
                    continue;
                };
                report.recipients += 1;
                match entry.mailbox.push(Arc::clone(frame)) {
                    PushOutcome::Delivered => report.delivered += 1,
                    PushOutcome::Full => {
                        report.dropped += 1;
                        let streak = entry.mailbox.consecutive_drops();
                        full.push((sid.clone(), entry.mailbox.dropped()));
                        if self.config.max_consecutive_drops.is_some_and(|max| streak >= max) {
                            slow.push(sid.clone());
                        }
                    }
                    PushOutcome::Closed => report.dropped += 1,
                }
            }
        }

        if !full.is_empty() {
            counter!(crate::metrics::WS_BROADCAST_DROPS_TOTAL).increment(full.len() as u64);
        }
        for (sid, total_drops) in &full {
            warn!(session_id = %sid, %room, total_drops, "mailbox full, dropping frame");
        }
        for sid in &slow {
            if self.unregister(sid) {
                report.kicked += 1;
                counter!(crate::metrics::WS_SLOW_CONSUMER_KICKS_TOTAL).increment(1);
                warn!(session_id = %sid, %room, "disconnecting slow consumer");
            }
        }
        debug!(%room, recipients = report.recipients, dropped = report.dropped, "broadcast");
        report
    }

    /// Push a frame to one session without blocking.
    pub fn send_to(&self, id: &SessionId, frame: Arc<str>) -> PushOutcome {
        let outcome = match self.registry.lock().sessions.get_mut(id) {
            Some(entry) => entry.mailbox.push(frame),
            None => PushOutcome::Closed,
        };
        if outcome == PushOutcome::Full {
            counter!(crate::metrics::WS_BROADCAST_DROPS_TOTAL).increment(1);
            warn!(session_id = %id, "mailbox full, dropping direct frame");
        }
        outcome
    }

    fn send_envelope(&self, id: &SessionId, envelope: &Outbound) {
        match envelope.to_frame() {
            Ok(frame) => {
                let _ = self.send_to(id, frame);
            }
            Err(e) => warn!(session_id = %id, error = %e, "failed to serialize envelope"),
        }
    }

    // ── Inbound routing ─────────────────────────────────────────────────

    /// Route one raw inbound payload from `session`.
    ///
    /// Malformed envelopes and authorization failures are dropped without a
    /// reply; the connection stays open.
    pub async fn handle_inbound(&self, session: &SessionInfo, raw: &[u8]) {
        let envelope = match Inbound::parse_bytes(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                counter!(crate::metrics::WS_MALFORMED_FRAMES_TOTAL).increment(1);
                debug!(session_id = %session.id, error = %e, "dropping malformed frame");
                return;
            }
        };

        debug!(session_id = %session.id, kind = envelope.kind(), room = %envelope.room(), "inbound envelope");
        match envelope {
            Inbound::Message { room, body } => self.relay_message(session, &room, &body).await,
            Inbound::Join { room } => self.handle_join(session, room).await,
            Inbound::Leave { room } => {
                if self.leave(&session.id, &room) {
                    self.send_envelope(&session.id, &Outbound::Left { room });
                }
            }
            Inbound::Typing { room } => {
                if !self.is_member(&session.id, &room) {
                    debug!(session_id = %session.id, %room, "typing from non-member ignored");
                    return;
                }
                let typing = Outbound::Typing {
                    room: room.clone(),
                    from: session.user_id.clone(),
                };
                if let Ok(frame) = typing.to_frame() {
                    let _ = self.broadcast(&room, &frame, Some(&session.id));
                }
            }
        }
    }

    async fn relay_message(&self, session: &SessionInfo, room: &RoomId, body: &str) {
        if !self.is_member(&session.id, room) {
            debug!(session_id = %session.id, %room, "message from non-member ignored");
            return;
        }
        let message = match self.chat.post_message(&session.user_id, room, body).await {
            Ok(message) => message,
            Err(e) if e.is_authorization() => {
                debug!(session_id = %session.id, %room, error = %e, "dropping unauthorized message");
                return;
            }
            Err(e) => {
                warn!(session_id = %session.id, %room, error = %e, "chat service rejected message");
                return;
            }
        };
        counter!(crate::metrics::CHAT_MESSAGES_TOTAL).increment(1);

        let frame = match Outbound::message(&message).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to serialize message");
                return;
            }
        };
        let exclude = (!self.config.echo_to_sender).then_some(&session.id);
        let _ = self.broadcast(&message.room, &frame, exclude);
    }

    async fn handle_join(&self, session: &SessionInfo, room: RoomId) {
        match self.chat.authorize_join(&session.user_id, &room).await {
            Ok(()) => {
                if self.join(&session.id, room.clone()) {
                    debug!(session_id = %session.id, %room, "joined room");
                    self.send_envelope(&session.id, &Outbound::Joined { room });
                }
            }
            Err(e) if e.is_authorization() => {
                debug!(session_id = %session.id, %room, error = %e, "join refused");
            }
            Err(e) => warn!(session_id = %session.id, %room, error = %e, "join failed"),
        }
    }

    // ── Session lifecycle ───────────────────────────────────────────────

    /// Admit an authenticated connection: register it, greet it, start its
    /// two pumps and join it to the user's standing rooms.
    ///
    /// Returns `None` once [`Hub::close_all`] has run; the transport is
    /// dropped unused.
    pub async fn accept<R, W>(
        self: &Arc<Self>,
        reader: R,
        writer: W,
        user_id: UserId,
    ) -> Option<ClientSession>
    where
        R: FrameRead + 'static,
        W: FrameWrite + 'static,
    {
        let info = SessionInfo::new(user_id);
        let Some(mailbox) = self.admit(&info) else {
            debug!(user_id = %info.user_id, "hub closed, refusing connection");
            return None;
        };
        self.send_envelope(
            &info.id,
            &Outbound::Established {
                data: EstablishedData {
                    session_id: info.id.clone(),
                    user_id: info.user_id.clone(),
                },
            },
        );

        let policy = self.config.heartbeat;
        let (reader, writer) = Connection::new(reader, writer, policy.max_message_size).split();
        let inbound = tokio::spawn(session::run_inbound(
            Arc::clone(self),
            info.clone(),
            reader,
            policy,
            self.config.rate_limit_per_second,
        ));
        let outbound = tokio::spawn(session::run_outbound(info.clone(), writer, mailbox, policy));

        match self.chat.rooms_for_user(&info.user_id).await {
            Ok(rooms) => {
                for room in rooms {
                    if !self.join(&info.id, room.clone()) {
                        break;
                    }
                    self.send_envelope(&info.id, &Outbound::Joined { room });
                }
            }
            Err(e) => warn!(session_id = %info.id, error = %e, "failed to load standing rooms"),
        }

        Some(ClientSession::new(info, inbound, outbound))
    }

    // ── Introspection ───────────────────────────────────────────────────

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.lock().sessions.len()
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.registry.lock().rooms.len()
    }

    /// Sessions currently in `room`.
    pub fn room_members(&self, room: &RoomId) -> Vec<SessionId> {
        self.registry
            .lock()
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms a session belongs to, sorted.
    pub fn rooms_of(&self, id: &SessionId) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self
            .registry
            .lock()
            .sessions
            .get(id)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Whether `id` is a member of `room`.
    pub fn is_member(&self, id: &SessionId, room: &RoomId) -> bool {
        self.registry
            .lock()
            .sessions
            .get(id)
            .is_some_and(|e| e.rooms.contains(room))
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.registry.lock().sessions.contains_key(id)
    }

    /// Lifetime full-mailbox drops for a session.
    pub fn dropped_count(&self, id: &SessionId) -> Option<u64> {
        self.registry
            .lock()
            .sessions
            .get(id)
            .map(|e| e.mailbox.dropped())
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let reg = self.registry.lock();
        for (sid, entry) in &reg.sessions {
            for room in &entry.rooms {
                assert!(reg.rooms.get(room).is_some_and(|m| m.contains(sid)), "{sid} missing from {room}");
            }
        }
        for (room, members) in &reg.rooms {
            assert!(!members.is_empty(), "empty room {room} retained");
            for sid in members {
                assert!(
                    reg.sessions.get(sid).is_some_and(|e| e.rooms.contains(room)),
                    "{room} lists stale member {sid}"
                );
            }
        }
    }
}

fn record_registered(info: &SessionInfo) {
    counter!(crate::metrics::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(crate::metrics::WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(session_id = %info.id, user_id = %info.user_id, "session registered");
}
