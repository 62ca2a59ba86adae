//! Per-connection client.
//!
//! A [`Client`] owns one established byte stream. Creating it splits the
//! stream and spawns two tasks on a [`TaskTracker`]: a receive loop feeding
//! [`Handler::on_message`](crate::handler::Handler::on_message) and a send
//! loop draining a bounded outbound queue. The handle is cheap to clone and
//! is what handlers see through [`Context::client`](crate::context::Context::client),
//! so the same connection can serve requests and issue its own calls.
//!
//! Either side may issue requests: [`Client::call`] blocks the caller until
//! the matching response arrives or the deadline passes, and
//! [`Client::call_async`] registers a callback invoked from the receive loop.

mod runtime;

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use bincode::{Decode, Encode};
use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
    sync::mpsc::{self, error::TrySendError},
    time::{Instant, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    connection::{ConnectionId, ConnectionInfo},
    context::Context,
    correlation::{AsyncCallback, Correlator},
    error::{CallError, SendError},
    handler::Handler,
    hooks::{BoxedReader, BoxedWriter},
    message::Message,
    metrics,
    panic::guard_call,
    serializer::{BincodeSerializer, Serializer},
};

struct ClientInner {
    info: ConnectionInfo,
    handler: Arc<Handler>,
    correlator: Correlator,
    next_seq: AtomicU64,
    outbound: mpsc::Sender<Message>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    closed: AtomicBool,
}

/// Handle to one connection.
///
/// Dropping every handle does not close the connection while its loops are
/// running; call [`Client::close`] or let the peer hang up.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("info", &self.inner.info)
            .field("correlator", &self.inner.correlator)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Start serving `stream` with `handler`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S>(stream: S, handler: Arc<Handler>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_peer(stream, handler, None)
    }

    /// Start serving `stream`, recording the peer's address for hooks and logs.
    pub fn with_peer<S>(stream: S, handler: Arc<Handler>, peer_addr: Option<SocketAddr>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = handler.wrap_reader(Box::new(read_half));
        let writer: BoxedWriter = Box::new(write_half);
        Self::spawn(
            ConnectionInfo::new(ConnectionId::next(), peer_addr),
            handler,
            reader,
            writer,
        )
    }

    /// Serve an accepted TCP stream.
    pub fn from_tcp(stream: TcpStream, handler: Arc<Handler>) -> Self {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => Some(addr),
            Err(e) => {
                log::warn!("Failed to retrieve peer address: error={e}");
                None
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY: error={e}");
        }
        Self::with_peer(stream, handler, peer_addr)
    }

    /// Connect to `addr` and serve the resulting stream.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs, handler: Arc<Handler>) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_tcp(stream, handler))
    }

    fn spawn(
        info: ConnectionInfo,
        handler: Arc<Handler>,
        reader: BoxedReader,
        writer: BoxedWriter,
    ) -> Self {
        let (outbound, queue) = mpsc::channel(handler.send_queue_size());
        let client = Self {
            inner: Arc::new(ClientInner {
                info,
                handler,
                correlator: Correlator::new(),
                next_seq: AtomicU64::new(1),
                outbound,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                closed: AtomicBool::new(false),
            }),
        };
        metrics::inc_connections();
        debug!("connection opened: id={}", client.inner.info.id());

        let tracker = &client.inner.tracker;
        tracker.spawn(runtime::send_loop(client.clone(), writer, queue));
        tracker.spawn(runtime::recv_loop(client.clone(), reader));
        client
    }

    /// Identity of this connection.
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo { &self.inner.info }

    /// Handler serving this connection.
    #[must_use]
    pub fn handler(&self) -> &Arc<Handler> { &self.inner.handler }

    /// Outstanding calls on this connection.
    #[must_use]
    pub fn correlator(&self) -> &Correlator { &self.inner.correlator }

    /// Whether [`Client::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::SeqCst) }

    fn next_seq(&self) -> u64 { self.inner.next_seq.fetch_add(1, Ordering::Relaxed) }

    /// Close the connection.
    ///
    /// Stops both loops, fails every outstanding call with
    /// [`CallError::Closed`] and shuts down the write half. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();
        let failed = self.inner.correlator.close();
        self.inner.tracker.close();
        metrics::dec_connections();
        debug!(
            "connection closed: id={}, failed_calls={failed}",
            self.inner.info.id()
        );
    }

    /// Wait until the connection is closed and its tasks have finished.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
        self.inner.tracker.wait().await;
    }

    /// Queue `message` for writing, waiting for room in the queue.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] once the connection is closed.
    pub async fn send(&self, message: Message) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        tokio::select! {
            biased;
            () = self.inner.shutdown.cancelled() => Err(SendError::Closed),
            sent = self.inner.outbound.send(message) => sent.map_err(|_| SendError::Closed),
        }
    }

    /// Queue `message` for writing without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::QueueFull`] when the queue is at capacity and
    /// [`SendError::Closed`] once the connection is closed.
    pub fn try_send(&self, message: Message) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.inner.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Call `method` and wait up to `deadline` for the response.
    ///
    /// The deadline covers both waiting for room in the outbound queue and
    /// waiting for the response. Returns the response message; an error
    /// response becomes [`CallError::Remote`]. Dropping the returned future
    /// withdraws the call.
    ///
    /// # Errors
    ///
    /// [`CallError::Timeout`] if no response arrives in time,
    /// [`CallError::Closed`] if the connection closes first, and framing or
    /// queueing errors if the request cannot be sent.
    pub async fn call(
        &self,
        method: &str,
        body: &[u8],
        deadline: Duration,
    ) -> Result<Message, CallError> {
        if self.is_closed() {
            return Err(CallError::Closed);
        }
        let seq = self.next_seq();
        let request = Message::request(self.inner.handler.message_pool(), method, seq, false, body)?;
        let mut rx = self.inner.correlator.register_session(seq).into_receiver();
        let _withdraw = Withdraw::session(&self.inner.correlator, seq);
        if self.is_closed() {
            return Err(CallError::Closed);
        }

        let exchange = async {
            self.send(request).await.map_err(CallError::from)?;
            (&mut rx).await.map_err(|_| CallError::Closed)
        };
        let waited = timeout(deadline, exchange).await;
        let response = match waited {
            Ok(outcome) => outcome?,
            Err(_) => {
                if self.inner.correlator.cancel_session(seq) {
                    return Err(CallError::Timeout);
                }
                // Delivered, or failed by close, between the deadline and the
                // cancellation.
                rx.await.map_err(|_| CallError::Closed)?
            }
        };
        if response.is_error() {
            return Err(CallError::Remote(
                String::from_utf8_lossy(response.body()).into_owned(),
            ));
        }
        Ok(response)
    }

    /// Call `method` and run `callback` with the outcome.
    ///
    /// Once this returns `Ok`, the callback runs exactly once: on the receive
    /// loop with the response context, with [`CallError::Timeout`] when
    /// `deadline` (if non-zero) passes, or with [`CallError::Closed`] when the
    /// connection closes. A zero `deadline` waits indefinitely. The deadline
    /// starts before the request is queued.
    ///
    /// # Errors
    ///
    /// Framing or queueing errors, [`CallError::Timeout`] if the queue stays
    /// full past the deadline, or [`CallError::Closed`] if the connection was
    /// already closed. The callback is then dropped without being invoked. If
    /// the connection closes while the request is being queued the callback
    /// receives [`CallError::Closed`] and this returns `Ok`.
    pub async fn call_async<F>(
        &self,
        method: &str,
        body: &[u8],
        callback: F,
        deadline: Duration,
    ) -> Result<(), CallError>
    where
        F: FnOnce(Result<Context, CallError>) + Send + Sync + 'static,
    {
        if self.is_closed() {
            return Err(CallError::Closed);
        }
        let started = Instant::now();
        let seq = self.next_seq();
        let request = Message::request(self.inner.handler.message_pool(), method, seq, true, body)?;
        let taken = self
            .inner
            .correlator
            .register_async(seq, AsyncCallback::new(callback));
        let withdraw = Withdraw::callback(&self.inner.correlator, seq);

        let queued = if deadline.is_zero() {
            self.send(request).await.map_err(CallError::from)
        } else {
            match timeout(deadline, self.send(request)).await {
                Ok(sent) => sent.map_err(CallError::from),
                Err(_) => Err(CallError::Timeout),
            }
        };
        if let Err(e) = queued {
            // A missing callback was already failed by `close`.
            return if withdraw.withdraw() { Err(e) } else { Ok(()) };
        }
        withdraw.keep();

        if !deadline.is_zero() {
            self.spawn_expiry(seq, deadline.saturating_sub(started.elapsed()), taken);
        }
        Ok(())
    }

    fn spawn_expiry(&self, seq: u64, remaining: Duration, taken: CancellationToken) {
        let client = self.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                () = client.inner.shutdown.cancelled() => {}
                () = taken.cancelled() => {}
                () = tokio::time::sleep(remaining) => {
                    if let Some(callback) = client.inner.correlator.take_async(seq) {
                        if let Err(panic) = guard_call(|| callback.invoke(Err(CallError::Timeout))) {
                            metrics::inc_panics(metrics::PanicSite::Callback);
                            log::error!("async callback panicked on timeout: seq={seq}, panic={panic}");
                        }
                    }
                }
            }
        });
    }

    /// Send a one-way notification, waiting for room in the queue.
    ///
    /// # Errors
    ///
    /// Framing or queueing errors.
    pub async fn notify(&self, method: &str, body: &[u8]) -> Result<(), CallError> {
        let message = Message::notify(
            self.inner.handler.message_pool(),
            method,
            self.next_seq(),
            body,
        )?;
        self.send(message).await?;
        Ok(())
    }

    /// Send a one-way notification without waiting.
    ///
    /// # Errors
    ///
    /// `CallError::Send(SendError::QueueFull)` when the queue is at capacity,
    /// otherwise as for [`Client::notify`].
    pub fn try_notify(&self, method: &str, body: &[u8]) -> Result<(), CallError> {
        let message = Message::notify(
            self.inner.handler.message_pool(),
            method,
            self.next_seq(),
            body,
        )?;
        self.try_send(message)?;
        Ok(())
    }

    /// Call `method` with a serialized `request` and decode the response.
    ///
    /// # Errors
    ///
    /// As for [`Client::call`], plus [`CallError::Encode`] and
    /// [`CallError::Decode`].
    pub async fn call_value<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
        deadline: Duration,
    ) -> Result<Resp, CallError>
    where
        Req: Encode,
        Resp: Decode<()>,
    {
        let body = BincodeSerializer
            .serialize(request)
            .map_err(CallError::Encode)?;
        let response = self.call(method, &body, deadline).await?;
        BincodeSerializer
            .deserialize(response.body())
            .map(|(value, _)| value)
            .map_err(CallError::Decode)
    }

    /// Notify `method` with a serialized `value`.
    ///
    /// # Errors
    ///
    /// As for [`Client::notify`], plus [`CallError::Encode`].
    pub async fn notify_value<T: Encode>(&self, method: &str, value: &T) -> Result<(), CallError> {
        let body = BincodeSerializer
            .serialize(value)
            .map_err(CallError::Encode)?;
        self.notify(method, &body).await
    }
}

/// Removes a call's correlator entry unless kept, so an abandoned call
/// leaves nothing behind.
struct Withdraw<'a> {
    correlator: &'a Correlator,
    seq: u64,
    callback: bool,
    armed: bool,
}

impl<'a> Withdraw<'a> {
    fn session(correlator: &'a Correlator, seq: u64) -> Self {
        Self {
            correlator,
            seq,
            callback: false,
            armed: true,
        }
    }

    fn callback(correlator: &'a Correlator, seq: u64) -> Self {
        Self {
            correlator,
            seq,
            callback: true,
            armed: true,
        }
    }

    /// Remove the entry now. Returns `true` if it was still registered.
    fn withdraw(mut self) -> bool {
        self.armed = false;
        self.remove()
    }

    /// Leave the entry for the response, expiry or close to resolve.
    fn keep(mut self) { self.armed = false; }

    fn remove(&self) -> bool {
        if self.callback {
            self.correlator.take_async(self.seq).is_some()
        } else {
            self.correlator.cancel_session(self.seq)
        }
    }
}

impl Drop for Withdraw<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.remove();
        }
    }
}

#[cfg(test)]
mod tests;
