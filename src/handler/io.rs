//! Reading and writing framed messages.

use std::io::{self, IoSlice};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Handler;
use crate::{
    connection::ConnectionInfo,
    error::{RecvError, SendError},
    message::{HEAD_LEN, Message, decode_head},
    metrics::{self, Direction},
};

fn frame_count(count: usize) -> u64 { u64::try_from(count).unwrap_or(u64::MAX) }

impl Handler {
    /// Read one message from `reader`.
    ///
    /// The `before_recv` hook runs first. The head is read and decoded, a
    /// pooled buffer sized for the whole frame is filled, and only then is the
    /// frame validated, so a rejected frame has been fully consumed and the
    /// stream stays aligned.
    ///
    /// # Errors
    ///
    /// - [`RecvError::Rejected`] if the hook vetoes the read;
    /// - [`RecvError::Io`] on transport failure or a short read;
    /// - [`RecvError::Malformed`] if the declared length exceeds the maximum;
    /// - [`RecvError::Invalid`] if the frame's method length is inconsistent.
    pub async fn recv<R>(&self, info: &ConnectionInfo, reader: &mut R) -> Result<Message, RecvError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.hooks.before_recv(info).map_err(RecvError::Rejected)?;

        let mut raw = [0u8; HEAD_LEN];
        reader.read_exact(&mut raw).await?;
        let head = decode_head(&raw).map_err(RecvError::Malformed)?;

        let mut buf = self.messages.acquire(head.total_len());
        buf.extend_from_slice(&raw);
        buf.resize(head.total_len(), 0);
        reader.read_exact(&mut buf[HEAD_LEN..]).await?;

        head.validate().map_err(RecvError::Invalid)?;
        metrics::inc_frames(Direction::Inbound, 1);
        Ok(Message::from_parts(head, buf))
    }

    /// Write one message and flush.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Rejected`] if the `before_send` hook vetoes the
    /// write, or [`SendError::Io`] if writing fails.
    pub async fn send<W>(
        &self,
        info: &ConnectionInfo,
        writer: &mut W,
        message: &Message,
    ) -> Result<usize, SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.hooks.before_send(info).map_err(SendError::Rejected)?;
        writer.write_all(message.as_bytes()).await?;
        writer.flush().await?;
        metrics::inc_frames(Direction::Outbound, 1);
        Ok(message.len())
    }

    /// Write `messages` back to back using vectored writes, then flush.
    ///
    /// The hook runs once for the whole batch. Frames are written in slice
    /// order; partial writes resume where the previous write stopped.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// As for [`Handler::send`]. A writer accepting zero bytes yields
    /// [`io::ErrorKind::WriteZero`].
    pub async fn send_batch<W>(
        &self,
        info: &ConnectionInfo,
        writer: &mut W,
        messages: &[Message],
    ) -> Result<usize, SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.hooks.before_send(info).map_err(SendError::Rejected)?;

        let total: usize = messages.iter().map(Message::len).sum();
        let mut slices: Vec<IoSlice<'_>> = messages
            .iter()
            .map(|message| IoSlice::new(message.as_bytes()))
            .collect();
        let mut pending: &mut [IoSlice<'_>] = &mut slices;
        IoSlice::advance_slices(&mut pending, 0);
        while !pending.is_empty() {
            let written = writer.write_vectored(pending).await?;
            if written == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            IoSlice::advance_slices(&mut pending, written);
        }
        writer.flush().await?;
        metrics::inc_frames(Direction::Outbound, frame_count(messages.len()));
        Ok(total)
    }
}
