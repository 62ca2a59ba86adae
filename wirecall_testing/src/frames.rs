//! Hand-encoded frames.
//!
//! [`wirecall::Message`] constructors refuse to build malformed frames, so
//! tests needing an empty method on a request, a method on a response or an
//! unknown command byte encode them here.

use wirecall::message::HEAD_LEN;

/// Encode a head declaring `body_len` bytes of method plus payload.
///
/// # Panics
///
/// Panics if `body_len` does not fit in the 32-bit length field.
#[must_use]
pub fn raw_head(cmd: u8, flags: u8, method_len: u8, body_len: usize, seq: u64) -> [u8; HEAD_LEN] {
    let body_len = u32::try_from(body_len).expect("body length fits in u32");
    let mut head = [0u8; HEAD_LEN];
    head[..4].copy_from_slice(&body_len.to_be_bytes());
    head[5] = cmd;
    head[6] = flags;
    head[7] = method_len;
    head[8..].copy_from_slice(&seq.to_be_bytes());
    head
}

/// Encode a complete frame carrying `method` followed by `body`.
///
/// # Panics
///
/// Panics if `method` is longer than 255 bytes.
#[must_use]
pub fn raw_frame(cmd: u8, flags: u8, method: &[u8], body: &[u8], seq: u64) -> Vec<u8> {
    let method_len = u8::try_from(method.len()).expect("method length fits in u8");
    let mut frame = Vec::with_capacity(HEAD_LEN + method.len() + body.len());
    frame.extend_from_slice(&raw_head(cmd, flags, method_len, method.len() + body.len(), seq));
    frame.extend_from_slice(method);
    frame.extend_from_slice(body);
    frame
}
