//! Error types for the hub and its collaborators.

use thiserror::Error;

/// Failure reading from or writing to a client connection.
///
/// Every variant is terminal for the session that observed it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The read deadline passed with no inbound frame.
    #[error("read deadline exceeded")]
    ReadTimeout,
    /// A single write did not complete within the write deadline.
    #[error("write deadline exceeded")]
    WriteTimeout,
    /// The connection was closed on this side.
    #[error("connection closed")]
    Closed,
    /// The peer went away without a close frame.
    #[error("connection reset by peer")]
    Eof,
    /// An inbound frame exceeded the configured size ceiling.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured ceiling.
        limit: usize,
    },
    /// Error surfaced by the underlying transport.
    #[error("transport error: {0}")]
    Transport(String),
}

impl TransportError {
    /// Whether this error warrants error-severity logging.
    ///
    /// A local close is the normal end of a session; everything else means
    /// the connection died underneath us.
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Error returned by the chat-service collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// The user may not act in this room.
    #[error("not permitted in room")]
    Forbidden,
    /// The room does not exist.
    #[error("room not found")]
    NotFound,
    /// The request was rejected on its content.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// The service could not complete the request.
    #[error("chat service unavailable: {0}")]
    Unavailable(String),
}

impl ChatError {
    /// Authorization failures are dropped silently so room existence does not leak.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Forbidden | Self::NotFound)
    }
}

/// Error validating a bearer credential.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential in the header or query string.
    #[error("missing bearer credential")]
    MissingCredential,
    /// The credential did not validate.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// The credential has expired.
    #[error("token expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::InvalidToken(err.to_string()),
        }
    }
}

/// Malformed inbound application envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Not valid JSON, or missing/invalid fields.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// The `type` field named an unknown operation.
    #[error("unknown envelope type: {0}")]
    UnknownType(String),
    /// A message envelope without a body.
    #[error("message envelope has no body")]
    MissingBody,
    /// A binary frame that was not UTF-8.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

/// Failure starting the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind or inspect the listener.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
    /// The configured host/port do not form a socket address.
    #[error("invalid listen address: {0}")]
    Address(String),
}
