//! Client session: the inbound and outbound pumps for one connection.
//!
//! The inbound pump owns the read half. It refreshes the read deadline on
//! every frame, rate-limits application frames and hands them to the hub.
//! On any read failure it unregisters the session and closes the connection.
//!
//! The outbound pump owns the write half. It drains the mailbox in batches
//! and pings on the heartbeat cadence. A closed mailbox means the hub tore
//! the session down: it sends a close frame and exits. Write failures close
//! the connection but never unregister; the inbound pump's next read fails
//! and drives that.

use std::sync::Arc;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use super::connection::{
    is_normal_close, ConnectionReader, ConnectionWriter, Frame, FrameRead, FrameWrite, CLOSE_NORMAL,
};
use super::heartbeat::HeartbeatPolicy;
use super::hub::Hub;
use super::mailbox::MailboxReceiver;
use super::rate_limit::RateLimiter;
use crate::errors::TransportError;
use crate::ids::{SessionId, UserId};

/// Identity of one live session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    /// Server-assigned session id.
    pub id: SessionId,
    /// Authenticated owner.
    pub user_id: UserId,
}

impl SessionInfo {
    /// New session identity for `user_id`.
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
        }
    }
}

/// Handles to a running session's two pumps.
pub struct ClientSession {
    info: SessionInfo,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl ClientSession {
    pub(crate) fn new(info: SessionInfo, inbound: JoinHandle<()>, outbound: JoinHandle<()>) -> Self {
        Self {
            info,
            inbound,
            outbound,
        }
    }

    /// Session identity.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Wait for both pumps to exit.
    pub async fn wait(self) {
        let _ = self.inbound.await;
        let _ = self.outbound.await;
    }
}

/// Why the inbound pump stopped.
enum ReadEnd {
    PeerClosed(Option<u16>),
    Failed(TransportError),
}

/// Read frames until the connection fails, then tear the session down.
#[instrument(skip_all, fields(session_id = %info.id, user_id = %info.user_id))]
pub async fn run_inbound<R: FrameRead>(
    hub: Arc<Hub>,
    info: SessionInfo,
    mut reader: ConnectionReader<R>,
    policy: HeartbeatPolicy,
    rate_limit: u32,
) {
    let mut limiter = RateLimiter::new(rate_limit, Instant::now());
    reader.set_read_deadline(policy.read_deadline(Instant::now()));

    let end = loop {
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(e) => break ReadEnd::Failed(e),
        };
        reader.set_read_deadline(policy.read_deadline(Instant::now()));

        let payload = match frame {
            Frame::Ping(_) | Frame::Pong(_) => continue,
            Frame::Close(code) => break ReadEnd::PeerClosed(code),
            Frame::Text(text) => text.into_bytes(),
            Frame::Binary(data) => data,
        };

        if !limiter.allow(Instant::now()) {
            counter!(crate::metrics::WS_RATE_LIMITED_TOTAL).increment(1);
            debug!(count = limiter.count(), "rate limit exceeded, dropping frame");
            continue;
        }
        hub.handle_inbound(&info, &payload).await;
    };

    match end {
        ReadEnd::PeerClosed(code) if is_normal_close(code) => info!(?code, "client closed connection"),
        ReadEnd::PeerClosed(code) => error!(?code, "client closed connection abnormally"),
        ReadEnd::Failed(e) if e.is_unexpected() => error!(error = %e, "connection read failed"),
        ReadEnd::Failed(e) => debug!(error = %e, "connection closed locally"),
    }

    let _ = hub.unregister(&info.id);
    reader.close();
}

/// Drain the mailbox onto the connection and ping on the heartbeat cadence.
#[instrument(skip_all, fields(session_id = %info.id))]
pub async fn run_outbound<W: FrameWrite>(
    info: SessionInfo,
    mut writer: ConnectionWriter<W>,
    mut mailbox: MailboxReceiver,
    policy: HeartbeatPolicy,
) {
    let mut ping = policy.ping_interval();
    let closed = writer.close_handle();

    let result = loop {
        tokio::select! {
            frame = mailbox.recv() => {
                let Some(frame) = frame else {
                    writer.set_write_deadline(policy.write_deadline(Instant::now()));
                    let _ = writer.write_frame(Frame::Close(Some(CLOSE_NORMAL))).await;
                    break Ok(());
                };
                if let Err(e) = write_batch(&mut writer, &mut mailbox, &frame, &policy).await {
                    break Err(e);
                }
            }
            _ = ping.tick() => {
                writer.set_write_deadline(policy.write_deadline(Instant::now()));
                if let Err(e) = writer.write_frame(Frame::Ping(Vec::new())).await {
                    break Err(e);
                }
            }
            () = closed.closed() => break Err(TransportError::Closed),
        }
    };

    match result {
        Ok(()) => debug!("mailbox closed, sent close frame"),
        Err(e) if e.is_unexpected() => error!(error = %e, "connection write failed"),
        Err(e) => debug!(error = %e, "outbound pump stopped"),
    }
    writer.close().await;
}

/// Write `first`, then every frame already queued behind it.
async fn write_batch<W: FrameWrite>(
    writer: &mut ConnectionWriter<W>,
    mailbox: &mut MailboxReceiver,
    first: &str,
    policy: &HeartbeatPolicy,
) -> Result<(), TransportError> {
    write_text(writer, first, policy).await?;
    while let Some(next) = mailbox.try_recv() {
        write_text(writer, &next, policy).await?;
    }
    Ok(())
}

async fn write_text<W: FrameWrite>(
    writer: &mut ConnectionWriter<W>,
    text: &str,
    policy: &HeartbeatPolicy,
) -> Result<(), TransportError> {
    writer.set_write_deadline(policy.write_deadline(Instant::now()));
    writer.write_frame(Frame::Text(text.to_owned())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::{memory_transport, Connection, MemoryPeer};
    use crate::websocket::mailbox::{mailbox, Mailbox};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn policy() -> HeartbeatPolicy {
        HeartbeatPolicy::with_pong_wait(Duration::from_secs(1), Duration::from_secs(10), 1024)
    }

    fn start_outbound(
        capacity: usize,
        peer_capacity: usize,
    ) -> (Mailbox, MemoryPeer, JoinHandle<()>) {
        let (transport, peer) = memory_transport(peer_capacity);
        let (_reader, writer) = Connection::new(transport.reader, transport.writer, 1024).split();
        let (tx, rx) = mailbox(capacity);
        let handle = tokio::spawn(run_outbound(
            SessionInfo::new(UserId::from("u")),
            writer,
            rx,
            policy(),
        ));
        (tx, peer, handle)
    }

    #[tokio::test]
    async fn outbound_writes_queued_frames_in_order() {
        let (mut tx, mut peer, _handle) = start_outbound(8, 8);
        for i in 0..5 {
            let _ = tx.push(Arc::from(format!("m{i}")));
        }
        for i in 0..5 {
            assert_eq!(peer.from_server.recv().await, Some(Frame::Text(format!("m{i}"))));
        }
    }

    #[tokio::test]
    async fn outbound_sends_close_when_mailbox_closes() {
        let (mut tx, mut peer, handle) = start_outbound(8, 8);
        let _ = tx.push(Arc::from("bye"));
        drop(tx);

        assert_eq!(peer.from_server.recv().await, Some(Frame::Text("bye".into())));
        assert_eq!(peer.from_server.recv().await, Some(Frame::Close(Some(CLOSE_NORMAL))));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_pings_on_cadence() {
        let (_tx, mut peer, _handle) = start_outbound(8, 8);
        let start = Instant::now();
        assert_eq!(peer.from_server.recv().await, Some(Frame::Ping(Vec::new())));
        assert!(start.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test]
    async fn outbound_exits_on_write_failure() {
        let (mut tx, peer, handle) = start_outbound(8, 8);
        drop(peer);
        let _ = tx.push(Arc::from("lost"));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_write_deadline_stops_pump() {
        // Peer buffer of one frame that is never read.
        let (mut tx, _peer, handle) = start_outbound(8, 1);
        let _ = tx.push(Arc::from("fills"));
        let _ = tx.push(Arc::from("stalls"));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn outbound_exits_when_reader_closes() {
        let (transport, _peer) = memory_transport(8);
        let (reader, writer) = Connection::new(transport.reader, transport.writer, 1024).split();
        let (_tx, rx) = mailbox(8);
        let handle = tokio::spawn(run_outbound(SessionInfo::new(UserId::from("u")), writer, rx, policy()));
        reader.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reader_close_interrupts_stalled_write() {
        let (transport, _peer) = memory_transport(1);
        let (reader, writer) = Connection::new(transport.reader, transport.writer, 1024).split();
        let (mut tx, rx) = mailbox(8);
        let handle = tokio::spawn(run_outbound(SessionInfo::new(UserId::from("u")), writer, rx, policy()));
        let _ = tx.push(Arc::from("fills"));
        let _ = tx.push(Arc::from("stalls"));
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        reader.close();
        // Well inside the one-second write deadline.
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("outbound pump still writing after close")
            .unwrap();
    }

    #[tokio::test]
    async fn inbound_rate_limits_and_unregisters_on_close() {
        let chat = crate::chat::InMemoryChatService::new(false);
        chat.create_room("r".into(), false, [UserId::from("a"), UserId::from("b")]);
        let hub = Arc::new(Hub::new(
            Arc::new(chat),
            crate::websocket::hub::HubConfig {
                rate_limit_per_second: 3,
                ..crate::websocket::hub::HubConfig::default()
            },
        ));

        let a = SessionInfo::new(UserId::from("a"));
        let b = SessionInfo::new(UserId::from("b"));
        let _ra = hub.register(&a);
        let mut rb = hub.register(&b);
        assert!(hub.join(&a.id, "r".into()));
        assert!(hub.join(&b.id, "r".into()));

        let (to_server, server_rx) = mpsc::channel(32);
        let (server_tx, _from_server) = mpsc::channel(32);
        let (reader, _writer) = Connection::new(server_rx, server_tx, 1024).split();
        let pump = tokio::spawn(run_inbound(Arc::clone(&hub), a.clone(), reader, policy(), 3));

        for i in 0..5 {
            to_server
                .send(Frame::Text(format!(r#"{{"room":"r","body":"m{i}"}}"#)))
                .await
                .unwrap();
        }
        to_server.send(Frame::Close(Some(CLOSE_NORMAL))).await.unwrap();
        pump.await.unwrap();

        let mut bodies = Vec::new();
        while let Some(frame) = rb.try_recv() {
            let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
            bodies.push(v["body"].as_str().unwrap().to_string());
        }
        assert_eq!(bodies, vec!["m0", "m1", "m2"]);
        assert!(!hub.contains(&a.id));
        assert!(hub.contains(&b.id));
    }

    #[tokio::test]
    async fn control_frames_bypass_rate_limit() {
        let hub = Arc::new(Hub::new(
            Arc::new(crate::chat::InMemoryChatService::new(false)),
            crate::websocket::hub::HubConfig::default(),
        ));
        let a = SessionInfo::new(UserId::from("a"));
        let _ra = hub.register(&a);

        let (to_server, server_rx) = mpsc::channel(64);
        let (server_tx, _from_server) = mpsc::channel(8);
        let (reader, _writer) = Connection::new(server_rx, server_tx, 1024).split();
        let pump = tokio::spawn(run_inbound(Arc::clone(&hub), a.clone(), reader, policy(), 1));

        for _ in 0..20 {
            to_server.send(Frame::Pong(Vec::new())).await.unwrap();
        }
        tokio::task::yield_now().await;
        assert!(hub.contains(&a.id));

        drop(to_server);
        pump.await.unwrap();
        assert!(!hub.contains(&a.id));
    }
}
