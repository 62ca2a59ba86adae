//! Runtime error types.
//!
//! Each layer reports its own error enum so callers can tell a vetoed
//! operation from a transport failure, a corrupt stream from a single bad
//! frame, and a timeout from a closed connection.

use std::{error::Error as StdError, io};

use thiserror::Error;

use crate::message::FrameError;

/// Boxed error produced by a payload serializer.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors returned by [`Handler::recv`](crate::handler::Handler::recv).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecvError {
    /// The `before_recv` hook vetoed the read; nothing was consumed.
    #[error("receive rejected by hook: {0}")]
    Rejected(#[source] io::Error),
    /// Reading from the transport failed, including short reads.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The head is corrupt and frame boundaries are lost.
    #[error("malformed stream: {0}")]
    Malformed(#[source] FrameError),
    /// A complete frame was read but violates the protocol.
    #[error("invalid message: {0}")]
    Invalid(#[source] FrameError),
}

impl RecvError {
    /// Returns `true` when the stream can still be read after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool { matches!(self, Self::Invalid(_)) }
}

/// Errors returned when writing or queueing messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SendError {
    /// The `before_send` hook vetoed the write; nothing was written.
    #[error("send rejected by hook: {0}")]
    Rejected(#[source] io::Error),
    /// Writing to the transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The outbound queue is at capacity.
    #[error("send queue full")]
    QueueFull,
    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

/// Errors observed by callers awaiting a response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CallError {
    /// No response arrived within the caller's deadline.
    #[error("call timed out")]
    Timeout,
    /// The connection closed before a response arrived.
    #[error("connection closed before a response arrived")]
    Closed,
    /// The request could not be framed.
    #[error("invalid request: {0}")]
    Frame(#[from] FrameError),
    /// The request could not be queued or written.
    #[error("failed to send request: {0}")]
    Send(#[from] SendError),
    /// The peer answered with an error response.
    #[error("remote error: {0}")]
    Remote(String),
    /// The request value could not be serialized.
    #[error("failed to serialize request")]
    Encode(#[source] BoxError),
    /// The response body could not be deserialized.
    #[error("failed to deserialize response")]
    Decode(#[source] BoxError),
}

/// Errors returned by [`Context`](crate::context::Context) reply methods.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReplyError {
    /// Only requests are answered; notifications and responses are not.
    #[error("message expects no response")]
    NoResponseExpected,
    /// The response could not be framed.
    #[error("invalid response: {0}")]
    Frame(#[from] FrameError),
    /// The response could not be queued.
    #[error("failed to send response: {0}")]
    Send(#[from] SendError),
    /// The response value could not be serialized.
    #[error("failed to serialize response")]
    Encode(#[source] BoxError),
}

/// Errors raised while building a handler.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The outbound queue capacity must be at least one.
    #[error("invalid send queue size {0}; must be >= 1")]
    InvalidSendQueueSize(usize),
}
