//! Bounded outbound mailbox with drop-on-full semantics.
//!
//! The sending half lives in the hub registry and is only touched under the
//! registry lock; dropping it closes the mailbox, which the outbound pump
//! observes as end-of-stream. Pushes never block.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// Default number of queued frames per session.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 2048;

/// Result of a non-blocking push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The frame was queued.
    Delivered,
    /// The mailbox was full; the frame was dropped.
    Full,
    /// The receiving pump has gone away; the frame was dropped.
    Closed,
}

/// Writer half of a session mailbox, held by the hub.
#[derive(Debug)]
pub struct Mailbox {
    tx: mpsc::Sender<Arc<str>>,
    dropped: u64,
    consecutive_drops: u64,
}

/// Reader half of a session mailbox, drained by the outbound pump.
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Arc<str>>,
}

/// Create a mailbox with `capacity` slots.
pub fn mailbox(capacity: usize) -> (Mailbox, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Mailbox {
            tx,
            dropped: 0,
            consecutive_drops: 0,
        },
        MailboxReceiver { rx },
    )
}

impl Mailbox {
    /// Queue a frame without waiting.
    pub fn push(&mut self, frame: Arc<str>) -> PushOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.consecutive_drops = 0;
                PushOutcome::Delivered
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                self.consecutive_drops += 1;
                PushOutcome::Full
            }
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Frames dropped over the session's lifetime because the mailbox was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Full-mailbox drops since the last successful push.
    pub fn consecutive_drops(&self) -> u64 {
        self.consecutive_drops
    }
}

impl MailboxReceiver {
    /// Wait for the next frame; `None` once the mailbox is closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Take an already-queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}
