//! Per-dispatch context handed to handlers and async callbacks.
//!
//! A [`Context`] pairs the connection's [`Client`] with the message being
//! dispatched, plus a small value map for handler-local data. Its state lives
//! in a [`ContextPool`]; dropping the context returns both the state and the
//! message buffer to their pools, whether the handler returned or panicked.

use std::{any::Any, collections::HashMap};

use bincode::{Decode, Encode};

use crate::{
    client::Client,
    error::{BoxError, ReplyError},
    message::{Cmd, Message},
    pool::{Pool, Pooled, Recycle},
    serializer::{BincodeSerializer, Serializer},
};

/// Pooled, reusable part of a [`Context`].
#[derive(Default)]
pub struct ContextState {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Recycle for ContextState {
    fn recycle(&mut self) { self.values.clear(); }
}

impl ContextState {
    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize { self.values.len() }

    /// Whether no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

/// Pool of context state shared by all connections of a handler.
pub type ContextPool = Pool<ContextState>;

/// A message being dispatched together with its connection.
pub struct Context {
    client: Client,
    message: Message,
    state: Pooled<ContextState>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("connection", &self.client.info().id())
            .field("message", &self.message)
            .field("values", &self.state.len())
            .finish()
    }
}

impl Context {
    pub(crate) fn new(client: Client, message: Message, state: Pooled<ContextState>) -> Self {
        Self {
            client,
            message,
            state,
        }
    }

    /// Connection the message arrived on.
    #[must_use]
    pub fn client(&self) -> &Client { &self.client }

    /// The dispatched message.
    #[must_use]
    pub fn message(&self) -> &Message { &self.message }

    /// Method name; empty for responses delivered to callbacks.
    #[must_use]
    pub fn method(&self) -> &str { self.message.method().unwrap_or_default() }

    /// Sequence number of the dispatched message.
    #[must_use]
    pub fn seq(&self) -> u64 { self.message.seq() }

    /// Payload of the dispatched message.
    #[must_use]
    pub fn body(&self) -> &[u8] { self.message.body() }

    /// Deserialize the payload with [`BincodeSerializer`].
    ///
    /// # Errors
    ///
    /// Returns the serializer's error if the payload does not decode.
    pub fn bind<T: Decode<()>>(&self) -> Result<T, BoxError> { self.bind_with(&BincodeSerializer) }

    /// Deserialize the payload with `serializer`.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error if the payload does not decode.
    pub fn bind_with<S: Serializer, T: Decode<()>>(&self, serializer: &S) -> Result<T, BoxError> {
        serializer.deserialize(self.body()).map(|(value, _)| value)
    }

    /// Answer the request with `body`.
    ///
    /// Waits for room in the connection's outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError::NoResponseExpected`] unless the dispatched
    /// message is a request, and framing or queueing errors otherwise.
    pub async fn write(&self, body: impl AsRef<[u8]>) -> Result<(), ReplyError> {
        self.expect_request()?;
        let response = Message::response(
            self.client.handler().message_pool(),
            self.seq(),
            self.message.is_async(),
            body.as_ref(),
        )?;
        self.client.send(response).await?;
        Ok(())
    }

    /// Answer the request with an error response carrying `reason`.
    ///
    /// # Errors
    ///
    /// As for [`Context::write`].
    pub async fn write_error(&self, reason: &str) -> Result<(), ReplyError> {
        self.expect_request()?;
        let response = Message::error_response(
            self.client.handler().message_pool(),
            self.seq(),
            self.message.is_async(),
            reason,
        )?;
        self.client.send(response).await?;
        Ok(())
    }

    /// Answer the request with `value` serialized by [`BincodeSerializer`].
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError::Encode`] if serialization fails, otherwise as for
    /// [`Context::write`].
    pub async fn write_value<T: Encode>(&self, value: &T) -> Result<(), ReplyError> {
        let body = BincodeSerializer
            .serialize(value)
            .map_err(ReplyError::Encode)?;
        self.write(body).await
    }

    /// Store a value for the remainder of this dispatch.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.state.values.insert(key.into(), Box::new(value));
    }

    /// Fetch a value stored with [`Context::set`].
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.state.values.get(key).and_then(|value| value.downcast_ref())
    }

    /// Remove a stored value, returning whether one was present.
    pub fn remove(&mut self, key: &str) -> bool { self.state.values.remove(key).is_some() }

    fn expect_request(&self) -> Result<(), ReplyError> {
        if self.message.cmd() == Some(Cmd::Request) {
            Ok(())
        } else {
            Err(ReplyError::NoResponseExpected)
        }
    }
}
