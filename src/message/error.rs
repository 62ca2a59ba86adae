//! Error types for the wire frame codec.
//!
//! Errors are split by what they do to the byte stream. A
//! [`FrameError::BodyTooLarge`] head means the declared length cannot be
//! trusted, so the reader can no longer find the next frame boundary. Every
//! other variant describes a single malformed frame whose boundaries are still
//! known; the frame can be discarded and the stream read on.

use thiserror::Error;

/// Errors raised while interpreting message bytes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    /// Fewer bytes were supplied than the head or declared length requires.
    #[error("truncated message: have {have} bytes, need {need}")]
    Truncated {
        /// Bytes available.
        have: usize,
        /// Bytes required.
        need: usize,
    },

    /// The declared body length exceeds [`super::MAX_BODY_LEN`].
    #[error("message body exceeds max length: {size} > {max}")]
    BodyTooLarge {
        /// Declared body length.
        size: usize,
        /// Maximum permitted body length.
        max: usize,
    },

    /// The method name is longer than [`super::MAX_METHOD_LEN`].
    #[error("method name exceeds max length: {len} > {max}")]
    MethodTooLong {
        /// Method name length in bytes.
        len: usize,
        /// Maximum permitted method length.
        max: usize,
    },

    /// The declared method length does not fit inside the body.
    #[error("method length {method_len} exceeds body length {body_len}")]
    MethodExceedsBody {
        /// Declared method length.
        method_len: usize,
        /// Declared body length.
        body_len: usize,
    },

    /// The buffer length disagrees with the length declared in the head.
    #[error("declared message length {declared} does not match buffer length {actual}")]
    LengthMismatch {
        /// `HEAD_LEN + body_len` as declared by the head.
        declared: usize,
        /// Length of the supplied buffer.
        actual: usize,
    },

    /// The method name bytes are not valid UTF-8.
    #[error("method name is not valid UTF-8")]
    InvalidMethod,
}

impl FrameError {
    /// Returns `true` when the error leaves frame boundaries unknown.
    ///
    /// ```
    /// use wirecall::message::FrameError;
    ///
    /// assert!(FrameError::BodyTooLarge { size: 1, max: 0 }.breaks_stream());
    /// assert!(!FrameError::InvalidMethod.breaks_stream());
    /// ```
    #[must_use]
    pub fn breaks_stream(&self) -> bool { matches!(self, Self::BodyTooLarge { .. }) }
}
