//! Wire messages: head codec, pooled message buffers and constructors.
//!
//! A [`Message`] is one contiguous frame (head followed by body) stored in a
//! buffer borrowed from a [`MessagePool`]. The message exclusively owns that
//! buffer and hands it back to the pool when dropped, so moving a message
//! through the receive path, the dispatcher and a handler transfers the
//! release obligation along with it.

mod error;
mod head;

use std::fmt;

use bytes::BytesMut;
pub use error::FrameError;
pub use head::{Cmd, Flags, HEAD_LEN, Head, MAX_BODY_LEN, MAX_METHOD_LEN, decode_head};

use crate::pool::{MessagePool, Pooled};

/// Borrowed view of a decoded message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageParts<'a> {
    /// Raw command byte.
    pub cmd: u8,
    /// Sequence number.
    pub seq: u64,
    /// Whether the async flag is set.
    pub is_async: bool,
    /// Whether the error flag is set.
    pub is_error: bool,
    /// Method name; empty for responses.
    pub method: &'a str,
    /// Payload following the method name.
    pub body: &'a [u8],
}

/// Decode a complete message held in `buf`.
///
/// # Errors
///
/// Returns [`FrameError::Truncated`] if `buf` is shorter than the head,
/// [`FrameError::LengthMismatch`] if its length disagrees with the head, and
/// the [`Head::validate`] or UTF-8 errors for a malformed method name.
///
/// ```
/// use wirecall::message::{Cmd, HEAD_LEN, decode_message};
///
/// let mut raw = vec![0u8; HEAD_LEN];
/// raw[3] = 6; // body length
/// raw[5] = Cmd::Request.as_u8();
/// raw[7] = 4; // method length
/// raw[15] = 1; // sequence
/// raw.extend_from_slice(b"echohi");
/// let parts = decode_message(&raw).expect("valid message");
/// assert_eq!(parts.method, "echo");
/// assert_eq!(parts.body, b"hi");
/// ```
pub fn decode_message(buf: &[u8]) -> Result<MessageParts<'_>, FrameError> {
    let raw_head: &[u8; HEAD_LEN] = buf
        .get(..HEAD_LEN)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(FrameError::Truncated {
            have: buf.len(),
            need: HEAD_LEN,
        })?;
    let head = decode_head(raw_head)?;
    head.validate()?;
    if buf.len() != head.total_len() {
        return Err(FrameError::LengthMismatch {
            declared: head.total_len(),
            actual: buf.len(),
        });
    }
    let (method, body) = buf[HEAD_LEN..].split_at(head.method_len);
    let method = std::str::from_utf8(method).map_err(|_| FrameError::InvalidMethod)?;
    Ok(MessageParts {
        cmd: head.cmd,
        seq: head.seq,
        is_async: head.flags.is_async(),
        is_error: head.flags.is_error(),
        method,
        body,
    })
}

/// A framed message owning a pooled buffer.
pub struct Message {
    head: Head,
    buf: Pooled<BytesMut>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("cmd", &self.head.cmd)
            .field("seq", &self.head.seq)
            .field("flags", &self.head.flags)
            .field("method_len", &self.head.method_len)
            .field("len", &self.buf.len())
            .finish()
    }
}

impl Message {
    /// Assemble a message from a decoded head and a buffer already holding
    /// exactly `head.total_len()` bytes.
    pub(crate) fn from_parts(head: Head, buf: Pooled<BytesMut>) -> Self {
        debug_assert_eq!(buf.len(), head.total_len());
        Self { head, buf }
    }

    fn build(
        pool: &MessagePool,
        cmd: Cmd,
        seq: u64,
        flags: Flags,
        method: &str,
        body: &[u8],
    ) -> Result<Self, FrameError> {
        if method.len() > MAX_METHOD_LEN {
            return Err(FrameError::MethodTooLong {
                len: method.len(),
                max: MAX_METHOD_LEN,
            });
        }
        let body_len = method.len() + body.len();
        if body_len > MAX_BODY_LEN {
            return Err(FrameError::BodyTooLarge {
                size: body_len,
                max: MAX_BODY_LEN,
            });
        }
        let head = Head {
            body_len,
            cmd: cmd.as_u8(),
            flags,
            method_len: method.len(),
            seq,
        };
        let mut buf = pool.acquire(head.total_len());
        head.encode_into(&mut *buf)?;
        buf.extend_from_slice(method.as_bytes());
        buf.extend_from_slice(body);
        Ok(Self::from_parts(head, buf))
    }

    /// Build a [`Cmd::Request`] for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MethodTooLong`] or [`FrameError::BodyTooLarge`].
    pub fn request(
        pool: &MessagePool,
        method: &str,
        seq: u64,
        is_async: bool,
        body: &[u8],
    ) -> Result<Self, FrameError> {
        let flags = Flags::empty().with_async(is_async);
        Self::build(pool, Cmd::Request, seq, flags, method, body)
    }

    /// Build a [`Cmd::Notify`] for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MethodTooLong`] or [`FrameError::BodyTooLarge`].
    pub fn notify(
        pool: &MessagePool,
        method: &str,
        seq: u64,
        body: &[u8],
    ) -> Result<Self, FrameError> {
        Self::build(pool, Cmd::Notify, seq, Flags::empty(), method, body)
    }

    /// Build a successful [`Cmd::Response`] for `seq`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::BodyTooLarge`].
    pub fn response(
        pool: &MessagePool,
        seq: u64,
        is_async: bool,
        body: &[u8],
    ) -> Result<Self, FrameError> {
        let flags = Flags::empty().with_async(is_async);
        Self::build(pool, Cmd::Response, seq, flags, "", body)
    }

    /// Build an error [`Cmd::Response`] whose payload is `reason`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::BodyTooLarge`].
    pub fn error_response(
        pool: &MessagePool,
        seq: u64,
        is_async: bool,
        reason: &str,
    ) -> Result<Self, FrameError> {
        let flags = Flags::empty().with_async(is_async).with_error(true);
        Self::build(pool, Cmd::Response, seq, flags, "", reason.as_bytes())
    }

    /// Decoded head.
    #[must_use]
    pub fn head(&self) -> &Head { &self.head }

    /// Command kind, or `None` for an unknown command byte.
    #[must_use]
    pub fn cmd(&self) -> Option<Cmd> { self.head.command() }

    /// Sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 { self.head.seq }

    /// Flag bits.
    #[must_use]
    pub fn flags(&self) -> Flags { self.head.flags }

    /// Whether the async flag is set.
    #[must_use]
    pub fn is_async(&self) -> bool { self.head.flags.is_async() }

    /// Whether the error flag is set.
    #[must_use]
    pub fn is_error(&self) -> bool { self.head.flags.is_error() }

    /// Length of the method name in bytes.
    #[must_use]
    pub fn method_len(&self) -> usize { self.head.method_len }

    /// Method name.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidMethod`] if the name is not UTF-8.
    pub fn method(&self) -> Result<&str, FrameError> {
        let end = HEAD_LEN + self.head.method_len;
        std::str::from_utf8(&self.buf[HEAD_LEN..end]).map_err(|_| FrameError::InvalidMethod)
    }

    /// Payload following the method name.
    #[must_use]
    pub fn body(&self) -> &[u8] { &self.buf[HEAD_LEN + self.head.method_len..] }

    /// The full encoded frame.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.buf }

    /// Encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Always `false`; a message holds at least its head.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Decode the borrowed parts of this message.
    ///
    /// # Errors
    ///
    /// Propagates [`decode_message`] errors.
    pub fn parts(&self) -> Result<MessageParts<'_>, FrameError> { decode_message(&self.buf) }
}
