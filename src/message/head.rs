//! Fixed-size message head.
//!
//! Layout (integers in network byte order):
//!
//! | bytes  | field        |
//! |--------|--------------|
//! | 0..4   | body length  |
//! | 4      | reserved     |
//! | 5      | command      |
//! | 6      | flags        |
//! | 7      | method length|
//! | 8..16  | sequence     |

use bytes::{Buf, BufMut};

use super::error::FrameError;

/// Size of the encoded head in bytes.
pub const HEAD_LEN: usize = 16;

/// Maximum method name length in bytes.
pub const MAX_METHOD_LEN: usize = 127;

/// Maximum body length in bytes (64 MiB including the head).
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024 - HEAD_LEN;

const FLAG_ERROR: u8 = 0b0000_0001;
const FLAG_ASYNC: u8 = 0b0000_0010;

/// Command kind carried by a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cmd {
    /// A call expecting exactly one [`Cmd::Response`].
    Request = 1,
    /// The answer to a [`Cmd::Request`]; never carries a method name.
    Response = 2,
    /// A one-way call; no response is sent.
    Notify = 3,
}

impl Cmd {
    /// Interpret a raw command byte.
    ///
    /// ```
    /// use wirecall::message::Cmd;
    ///
    /// assert_eq!(Cmd::from_u8(3), Some(Cmd::Notify));
    /// assert_eq!(Cmd::from_u8(9), None);
    /// ```
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Notify),
            _ => None,
        }
    }

    /// Raw command byte written to the wire.
    #[must_use]
    pub const fn as_u8(self) -> u8 { self as u8 }
}

/// Flag bits stored in the head.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    /// No flags set.
    #[must_use]
    pub const fn empty() -> Self { Self(0) }

    /// Wrap raw flag bits. Unknown bits are preserved.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self { Self(bits) }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 { self.0 }

    /// Whether the message is an error response.
    #[must_use]
    pub const fn is_error(self) -> bool { self.0 & FLAG_ERROR != 0 }

    /// Whether the response is routed to an async callback.
    #[must_use]
    pub const fn is_async(self) -> bool { self.0 & FLAG_ASYNC != 0 }

    /// Return a copy with the error bit set or cleared.
    #[must_use]
    pub const fn with_error(self, on: bool) -> Self { Self::toggle(self, FLAG_ERROR, on) }

    /// Return a copy with the async bit set or cleared.
    #[must_use]
    pub const fn with_async(self, on: bool) -> Self { Self::toggle(self, FLAG_ASYNC, on) }

    const fn toggle(self, bit: u8, on: bool) -> Self {
        if on {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }
}

/// Decoded message head.
///
/// `cmd` keeps the raw byte so frames with an unknown command still decode
/// and can be reported by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Head {
    /// Length of method name plus payload.
    pub body_len: usize,
    /// Raw command byte.
    pub cmd: u8,
    /// Flag bits.
    pub flags: Flags,
    /// Length of the method name at the start of the body.
    pub method_len: usize,
    /// Sequence number correlating requests and responses.
    pub seq: u64,
}

impl Head {
    /// Total encoded message length, head included.
    #[must_use]
    pub fn total_len(&self) -> usize { HEAD_LEN + self.body_len }

    /// Parsed command kind, or `None` for an unknown command byte.
    #[must_use]
    pub fn command(&self) -> Option<Cmd> { Cmd::from_u8(self.cmd) }

    /// Check the single-frame invariants that [`decode_head`] leaves alone.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MethodTooLong`] or
    /// [`FrameError::MethodExceedsBody`].
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.method_len > MAX_METHOD_LEN {
            return Err(FrameError::MethodTooLong {
                len: self.method_len,
                max: MAX_METHOD_LEN,
            });
        }
        if self.method_len > self.body_len {
            return Err(FrameError::MethodExceedsBody {
                method_len: self.method_len,
                body_len: self.body_len,
            });
        }
        Ok(())
    }

    /// Append the encoded head to `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body or method length cannot be represented.
    pub fn encode_into<B: BufMut>(&self, dst: &mut B) -> Result<(), FrameError> {
        if self.body_len > MAX_BODY_LEN {
            return Err(FrameError::BodyTooLarge {
                size: self.body_len,
                max: MAX_BODY_LEN,
            });
        }
        self.validate()?;
        let body_len = u32::try_from(self.body_len).map_err(|_| FrameError::BodyTooLarge {
            size: self.body_len,
            max: MAX_BODY_LEN,
        })?;
        let method_len = u8::try_from(self.method_len).map_err(|_| FrameError::MethodTooLong {
            len: self.method_len,
            max: MAX_METHOD_LEN,
        })?;
        dst.put_u32(body_len);
        dst.put_u8(0);
        dst.put_u8(self.cmd);
        dst.put_u8(self.flags.bits());
        dst.put_u8(method_len);
        dst.put_u64(self.seq);
        Ok(())
    }
}

/// Decode a head from exactly [`HEAD_LEN`] bytes.
///
/// Only stream-level corruption is rejected here; call [`Head::validate`] for
/// the per-frame checks once the body has been consumed.
///
/// # Errors
///
/// Returns [`FrameError::BodyTooLarge`] if the declared body exceeds
/// [`MAX_BODY_LEN`].
///
/// ```
/// use wirecall::message::{Cmd, HEAD_LEN, decode_head};
///
/// let mut raw = [0u8; HEAD_LEN];
/// raw[3] = 4; // body length
/// raw[5] = Cmd::Response.as_u8();
/// raw[15] = 7; // sequence
/// let head = decode_head(&raw).expect("valid head");
/// assert_eq!(head.total_len(), HEAD_LEN + 4);
/// assert_eq!(head.command(), Some(Cmd::Response));
/// assert_eq!(head.seq, 7);
/// ```
pub fn decode_head(bytes: &[u8; HEAD_LEN]) -> Result<Head, FrameError> {
    let mut src = &bytes[..];
    let body_len = src.get_u32() as usize;
    src.advance(1);
    let cmd = src.get_u8();
    let flags = Flags::from_bits(src.get_u8());
    let method_len = usize::from(src.get_u8());
    let seq = src.get_u64();

    if body_len > MAX_BODY_LEN {
        return Err(FrameError::BodyTooLarge {
            size: body_len,
            max: MAX_BODY_LEN,
        });
    }

    Ok(Head {
        body_len,
        cmd,
        flags,
        method_len,
        seq,
    })
}
