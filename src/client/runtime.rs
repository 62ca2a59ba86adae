//! Receive and send loops driving a [`Client`].

use std::{io, sync::Arc};

use log::{debug, info, warn};
use tokio::{io::AsyncWriteExt, sync::mpsc};

use super::Client;
use crate::{
    config::{DispatchMode, MAX_BATCH_FRAMES, RecoveryPolicy},
    error::{RecvError, SendError},
    hooks::{BoxedReader, BoxedWriter},
    message::Message,
    metrics,
};

/// Read messages until the stream ends, fails or the client closes.
pub(super) async fn recv_loop(client: Client, mut reader: BoxedReader) {
    let handler = Arc::clone(client.handler());
    let info = client.info().clone();
    let shutdown = client.inner.shutdown.clone();

    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            received = handler.recv(&info, &mut reader) => received,
        };
        match received {
            Ok(message) => match handler.dispatch_mode() {
                DispatchMode::Inline => {
                    let _ = handler.on_message(&client, message).await;
                }
                DispatchMode::Spawn => {
                    let handler = Arc::clone(&handler);
                    let client = client.clone();
                    client.inner.tracker.clone().spawn(async move {
                        let _ = handler.on_message(&client, message).await;
                    });
                }
            },
            Err(RecvError::Invalid(e)) if handler.violation_policy() == RecoveryPolicy::Drop => {
                warn!("invalid message dropped: id={}, error={e}", info.id());
                metrics::inc_dropped("invalid_frame");
            }
            Err(RecvError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("connection closed by peer: id={}", info.id());
                break;
            }
            Err(e) => {
                info!(
                    "receive loop stopped: id={}, error={e}, policy={}",
                    info.id(),
                    handler.violation_policy().as_str()
                );
                tracing::info!(id = %info.id(), error = %e, "receive loop stopped");
                break;
            }
        }
    }
    client.close();
}

/// Drain the outbound queue until the client closes or a write fails.
pub(super) async fn send_loop(
    client: Client,
    mut writer: BoxedWriter,
    mut queue: mpsc::Receiver<Message>,
) {
    let handler = Arc::clone(client.handler());
    let info = client.info().clone();
    let shutdown = client.inner.shutdown.clone();
    let limit = if handler.batch_send() { MAX_BATCH_FRAMES } else { 1 };
    let mut batch: Vec<Message> = Vec::with_capacity(limit);

    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            received = queue.recv_many(&mut batch, limit) => received,
        };
        if received == 0 {
            break;
        }
        let write = async {
            match batch.as_slice() {
                [message] => handler.send(&info, &mut writer, message).await,
                messages => handler.send_batch(&info, &mut writer, messages).await,
            }
        };
        let written = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            written = write => written,
        };
        let frames = batch.len();
        batch.clear();
        match written {
            Ok(_) => {}
            Err(SendError::Rejected(e)) => {
                warn!("send rejected by hook, {frames} frame(s) dropped: id={}, error={e}", info.id());
            }
            Err(e) => {
                info!("send loop stopped: id={}, error={e}", info.id());
                tracing::info!(id = %info.id(), error = %e, "send loop stopped");
                break;
            }
        }
    }

    queue.close();
    if let Err(e) = writer.shutdown().await {
        debug!("write half shutdown failed: id={}, error={e}", info.id());
    }
    client.close();
}
