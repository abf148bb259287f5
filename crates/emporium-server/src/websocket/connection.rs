//! Connection wrapper: one framed bidirectional connection split into an
//! exclusively-owned read half and write half.
//!
//! The halves share a close signal. Closing either half makes any pending or
//! later operation on the other half fail with [`TransportError::Closed`],
//! so neither pump touches the transport after `close()`.
//!
//! No buffering or payload interpretation happens here. Transport errors are
//! surfaced verbatim and never retried.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;

/// Normal closure status code.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (page navigation, server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A single transport frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// Liveness probe.
    Ping(Vec<u8>),
    /// Liveness reply.
    Pong(Vec<u8>),
    /// Close handshake with an optional status code.
    Close(Option<u16>),
}

impl Frame {
    /// Length of the data payload (zero for control frames).
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
            Self::Ping(_) | Self::Pong(_) | Self::Close(_) => 0,
        }
    }
}

/// Whether a peer close code represents an orderly, client-initiated close.
pub fn is_normal_close(code: Option<u16>) -> bool {
    matches!(code, None | Some(CLOSE_NORMAL | CLOSE_GOING_AWAY))
}

/// Read side of a framed transport.
#[async_trait]
pub trait FrameRead: Send {
    /// Wait for the next frame.
    async fn recv_frame(&mut self) -> Result<Frame, TransportError>;
}

/// Write side of a framed transport.
#[async_trait]
pub trait FrameWrite: Send {
    /// Write one frame.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;
    /// Flush and release the transport.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}

/// Shared close signal for the two halves of one connection.
#[derive(Clone, Debug, Default)]
pub struct CloseHandle {
    token: CancellationToken,
}

impl CloseHandle {
    /// Mark the connection closed. Idempotent.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// A framed connection before it is split between the two pumps.
pub struct Connection<R, W> {
    reader: R,
    writer: W,
    max_message_size: usize,
}

impl<R: FrameRead, W: FrameWrite> Connection<R, W> {
    /// Wrap a transport's read and write halves.
    pub fn new(reader: R, writer: W, max_message_size: usize) -> Self {
        Self {
            reader,
            writer,
            max_message_size,
        }
    }

    /// Split into independently owned halves sharing one close signal.
    pub fn split(self) -> (ConnectionReader<R>, ConnectionWriter<W>) {
        let closed = CloseHandle::default();
        (
            ConnectionReader {
                inner: self.reader,
                deadline: None,
                max_message_size: self.max_message_size,
                closed: closed.clone(),
            },
            ConnectionWriter {
                inner: self.writer,
                deadline: None,
                closed,
            },
        )
    }
}

/// Read half: owned by the inbound pump.
pub struct ConnectionReader<R> {
    inner: R,
    deadline: Option<Instant>,
    max_message_size: usize,
    closed: CloseHandle,
}

impl<R: FrameRead> ConnectionReader<R> {
    /// Fail the next read if no frame arrives by `deadline`.
    pub fn set_read_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Read one frame, honouring the read deadline, the size ceiling and the
    /// close signal.
    pub async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        let closed = self.closed.clone();
        let frame = tokio::select! {
            biased;
            () = closed.closed() => return Err(TransportError::Closed),
            result = recv_until(&mut self.inner, self.deadline) => result?,
        };
        let size = frame.payload_len();
        if size > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size,
                limit: self.max_message_size,
            });
        }
        Ok(frame)
    }

    /// Close the connection from the read side.
    pub fn close(&self) {
        self.closed.close();
    }
}

async fn recv_until<R: FrameRead>(
    reader: &mut R,
    deadline: Option<Instant>,
) -> Result<Frame, TransportError> {
    match deadline {
        Some(at) => time::timeout_at(at, reader.recv_frame())
            .await
            .unwrap_or(Err(TransportError::ReadTimeout)),
        None => reader.recv_frame().await,
    }
}

/// Write half: owned by the outbound pump.
pub struct ConnectionWriter<W> {
    inner: W,
    deadline: Option<Instant>,
    closed: CloseHandle,
}

impl<W: FrameWrite> ConnectionWriter<W> {
    /// Fail the next write if it has not completed by `deadline`.
    pub fn set_write_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Write one frame, honouring the write deadline and the close signal.
    /// A close from the read side abandons a write already in progress.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        let closed = self.closed.clone();
        tokio::select! {
            biased;
            () = closed.closed() => Err(TransportError::Closed),
            result = send_until(&mut self.inner, frame, self.deadline) => result,
        }
    }

    /// Close the connection. The transport is released only if the read side
    /// has not already closed it.
    pub async fn close(&mut self) {
        if self.closed.is_closed() {
            return;
        }
        self.closed.close();
        let shutdown = self.inner.shutdown();
        let _ = match self.deadline {
            Some(at) => time::timeout_at(at, shutdown)
                .await
                .unwrap_or(Err(TransportError::WriteTimeout)),
            None => shutdown.await,
        };
    }

    /// A handle to this connection's close signal.
    pub fn close_handle(&self) -> CloseHandle {
        self.closed.clone()
    }
}

async fn send_until<W: FrameWrite>(
    writer: &mut W,
    frame: Frame,
    deadline: Option<Instant>,
) -> Result<(), TransportError> {
    match deadline {
        Some(at) => time::timeout_at(at, writer.send_frame(frame))
            .await
            .unwrap_or(Err(TransportError::WriteTimeout)),
        None => writer.send_frame(frame).await,
    }
}

// ── axum WebSocket adapter ──────────────────────────────────────────────────

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Text(text.as_str().to_owned()),
            Message::Binary(data) => Self::Binary(data.to_vec()),
            Message::Ping(data) => Self::Ping(data.to_vec()),
            Message::Pong(data) => Self::Pong(data.to_vec()),
            Message::Close(frame) => Self::Close(frame.map(|f| f.code)),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(text.into()),
            Frame::Binary(data) => Self::Binary(data.into()),
            Frame::Ping(data) => Self::Ping(data.into()),
            Frame::Pong(data) => Self::Pong(data.into()),
            Frame::Close(code) => Self::Close(code.map(|code| CloseFrame {
                code,
                reason: "".into(),
            })),
        }
    }
}

#[async_trait]
impl FrameRead for SplitStream<WebSocket> {
    async fn recv_frame(&mut self) -> Result<Frame, TransportError> {
        match self.next().await {
            Some(Ok(message)) => Ok(Frame::from(message)),
            Some(Err(e)) => Err(TransportError::Transport(e.to_string())),
            None => Err(TransportError::Eof),
        }
    }
}

#[async_trait]
impl FrameWrite for SplitSink<WebSocket, Message> {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        SinkExt::send(self, Message::from(frame))
            .await
            .map_err(|e| TransportError::Transport(e.to_string()))
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self)
            .await
            .map_err(|e| TransportError::Transport(e.to_string()))
    }
}

// ── In-process transport ────────────────────────────────────────────────────

#[async_trait]
impl FrameRead for mpsc::Receiver<Frame> {
    async fn recv_frame(&mut self) -> Result<Frame, TransportError> {
        self.recv().await.ok_or(TransportError::Eof)
    }
}

#[async_trait]
impl FrameWrite for mpsc::Sender<Frame> {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.send(frame).await.map_err(|_| TransportError::Eof)
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Server-side halves of an in-process transport.
pub struct MemoryTransport {
    /// Frames sent by the peer.
    pub reader: mpsc::Receiver<Frame>,
    /// Frames delivered to the peer.
    pub writer: mpsc::Sender<Frame>,
}

/// Client-side end of an in-process transport.
pub struct MemoryPeer {
    /// Send frames to the server.
    pub to_server: mpsc::Sender<Frame>,
    /// Receive frames written by the server.
    pub from_server: mpsc::Receiver<Frame>,
}

/// Create a connected in-process transport with `capacity` frames of
/// buffering in each direction.
pub fn memory_transport(capacity: usize) -> (MemoryTransport, MemoryPeer) {
    let (to_server, reader) = mpsc::channel(capacity);
    let (writer, from_server) = mpsc::channel(capacity);
    (
        MemoryTransport { reader, writer },
        MemoryPeer {
            to_server,
            from_server,
        },
    )
}
