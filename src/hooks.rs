//! Pluggable hooks consulted by the receive and send paths.
//!
//! Hooks are installed once on the [`HandlerBuilder`](crate::handler::HandlerBuilder)
//! and shared by every connection using the resulting handler:
//!
//! - `before_recv` runs before each message is read and may veto the read.
//! - `before_send` runs before each write (single or batched) and may veto it.
//! - the reader wrapper decorates the read half of a connection, for example
//!   with buffering, when batched receives are enabled.

use std::{io, sync::Arc};

use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::connection::ConnectionInfo;

/// Read half of a connection after optional wrapping.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Hook run before a message is read. Returning an error vetoes the read.
pub type BeforeRecvHook = Arc<dyn Fn(&ConnectionInfo) -> io::Result<()> + Send + Sync>;

/// Hook run before a message or batch is written. Returning an error vetoes the write.
pub type BeforeSendHook = Arc<dyn Fn(&ConnectionInfo) -> io::Result<()> + Send + Sync>;

/// Decorates the read half of a connection.
pub type ReaderWrapper = Arc<dyn Fn(BoxedReader) -> BoxedReader + Send + Sync>;

/// Read buffer size used by the default reader wrapper.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Reader wrapper adding a [`BufReader`] of `capacity` bytes.
///
/// ```
/// use wirecall::hooks::buffered_reader;
///
/// let wrap = buffered_reader(4096);
/// let _reader = wrap(Box::new(tokio::io::empty()));
/// ```
#[must_use]
pub fn buffered_reader(capacity: usize) -> ReaderWrapper {
    Arc::new(move |reader: BoxedReader| -> BoxedReader {
        Box::new(BufReader::with_capacity(capacity, reader))
    })
}

/// Hooks installed on a handler.
#[derive(Clone)]
pub(crate) struct ConnectionHooks {
    pub(crate) before_recv: Option<BeforeRecvHook>,
    pub(crate) before_send: Option<BeforeSendHook>,
    pub(crate) wrap_reader: ReaderWrapper,
}

impl Default for ConnectionHooks {
    fn default() -> Self {
        Self {
            before_recv: None,
            before_send: None,
            wrap_reader: buffered_reader(DEFAULT_READ_BUFFER),
        }
    }
}

impl ConnectionHooks {
    /// Run the `before_recv` hook if registered.
    pub(crate) fn before_recv(&self, info: &ConnectionInfo) -> io::Result<()> {
        match &self.before_recv {
            Some(hook) => hook(info),
            None => Ok(()),
        }
    }

    /// Run the `before_send` hook if registered.
    pub(crate) fn before_send(&self, info: &ConnectionInfo) -> io::Result<()> {
        match &self.before_send {
            Some(hook) => hook(info),
            None => Ok(()),
        }
    }

    /// Apply the reader wrapper.
    pub(crate) fn wrap_reader(&self, reader: BoxedReader) -> BoxedReader { (self.wrap_reader)(reader) }
}
