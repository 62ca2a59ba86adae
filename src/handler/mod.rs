//! Message handler shared by connections.
//!
//! A [`Handler`] bundles the method router, the pools, the connection hooks
//! and the [`HandlerConfig`]. It implements the three per-connection
//! primitives: reading one message ([`Handler::recv`]), writing one message
//! or a batch ([`Handler::send`], [`Handler::send_batch`]) and dispatching an
//! inbound message ([`Handler::on_message`]). Handlers are built once with a
//! [`HandlerBuilder`], wrapped in an [`Arc`] and shared by every
//! [`Client`](crate::client::Client).

mod dispatch;
mod io;

use std::{future::Future, sync::Arc};

pub use dispatch::{Dispatch, DropReason};

use crate::{
    client::Client,
    config::{DispatchMode, HandlerConfig, RecoveryPolicy},
    connection::ConnectionInfo,
    context::{Context, ContextPool},
    error::ConfigError,
    hooks::{BoxedReader, ConnectionHooks, ReaderWrapper, buffered_reader},
    message::Message,
    pool::MessagePool,
    router::{HandlerFn, RouteError, Router, RouterBuilder, handler_fn},
};

/// Routing table, pools, hooks and settings shared by connections.
pub struct Handler {
    config: HandlerConfig,
    router: Router,
    hooks: ConnectionHooks,
    messages: MessagePool,
    contexts: ContextPool,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

impl Handler {
    /// Start configuring a handler.
    #[must_use]
    pub fn builder() -> HandlerBuilder { HandlerBuilder::default() }

    /// Settings in effect.
    #[must_use]
    pub fn config(&self) -> &HandlerConfig { &self.config }

    /// Whether connection readers are wrapped.
    #[must_use]
    pub fn batch_recv(&self) -> bool { self.config.batch_recv }

    /// Whether queued outbound frames are coalesced into vectored writes.
    #[must_use]
    pub fn batch_send(&self) -> bool { self.config.batch_send }

    /// Capacity of each connection's outbound queue.
    #[must_use]
    pub fn send_queue_size(&self) -> usize { self.config.send_queue_size }

    /// Where handlers run.
    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode { self.config.dispatch }

    /// Treatment of single-frame protocol violations.
    #[must_use]
    pub fn violation_policy(&self) -> RecoveryPolicy { self.config.violation_policy }

    /// Registered routes.
    #[must_use]
    pub fn router(&self) -> &Router { &self.router }

    /// Pool backing every message read or built for this handler.
    #[must_use]
    pub fn message_pool(&self) -> &MessagePool { &self.messages }

    /// Pool backing dispatch contexts.
    #[must_use]
    pub fn context_pool(&self) -> &ContextPool { &self.contexts }

    /// Apply the reader wrapper if batched receives are enabled.
    #[must_use]
    pub fn wrap_reader(&self, reader: BoxedReader) -> BoxedReader {
        if self.config.batch_recv {
            self.hooks.wrap_reader(reader)
        } else {
            reader
        }
    }

    /// Copy routes, hooks, settings and pools into a new builder.
    ///
    /// The builder may register further routes or change settings without
    /// affecting this handler.
    #[must_use]
    pub fn to_builder(&self) -> HandlerBuilder {
        HandlerBuilder {
            config: self.config,
            routes: self.router.to_builder(),
            hooks: self.hooks.clone(),
            messages: Some(self.messages.clone()),
            contexts: Some(self.contexts.clone()),
        }
    }

    pub(crate) fn new_context(&self, client: Client, message: Message) -> Context {
        Context::new(client, message, self.contexts.acquire())
    }
}

/// Builder for [`Handler`].
///
/// ```
/// use wirecall::handler::Handler;
///
/// let handler = Handler::builder()
///     .route("echo", |ctx| async move {
///         let body = ctx.body().to_vec();
///         let _ = ctx.write(&body).await;
///     })
///     .expect("register echo")
///     .send_queue_size(64)
///     .build()
///     .expect("valid handler");
/// assert!(handler.router().lookup("echo").is_some());
/// ```
#[derive(Clone, Default)]
pub struct HandlerBuilder {
    config: HandlerConfig,
    routes: RouterBuilder,
    hooks: ConnectionHooks,
    messages: Option<MessagePool>,
    contexts: Option<ContextPool>,
}

impl HandlerBuilder {
    /// Route `method` to an async closure.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] for a duplicate, empty or over-long method.
    pub fn route<F, Fut>(self, method: impl Into<String>, f: F) -> Result<Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.route_handler(method, handler_fn(f))
    }

    /// Route `method` to an already boxed handler.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] for a duplicate, empty or over-long method.
    pub fn route_handler(
        mut self,
        method: impl Into<String>,
        handler: HandlerFn,
    ) -> Result<Self, RouteError> {
        self.routes = self.routes.route(method, handler)?;
        Ok(self)
    }

    /// Replace all settings at once.
    #[must_use]
    pub fn config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable reader wrapping.
    #[must_use]
    pub fn batch_recv(mut self, enabled: bool) -> Self {
        self.config.batch_recv = enabled;
        self
    }

    /// Enable or disable vectored batch writes.
    #[must_use]
    pub fn batch_send(mut self, enabled: bool) -> Self {
        self.config.batch_send = enabled;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub fn send_queue_size(mut self, size: usize) -> Self {
        self.config.send_queue_size = size;
        self
    }

    /// Choose where handlers run.
    #[must_use]
    pub fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    /// Choose how single-frame protocol violations are treated.
    #[must_use]
    pub fn violation_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.config.violation_policy = policy;
        self
    }

    /// Install a hook run before every read.
    #[must_use]
    pub fn before_recv<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectionInfo) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.hooks.before_recv = Some(Arc::new(hook));
        self
    }

    /// Install a hook run before every write or batch.
    #[must_use]
    pub fn before_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectionInfo) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.hooks.before_send = Some(Arc::new(hook));
        self
    }

    /// Replace the reader wrapper applied when batched receives are enabled.
    #[must_use]
    pub fn reader_wrapper(mut self, wrapper: ReaderWrapper) -> Self {
        self.hooks.wrap_reader = wrapper;
        self
    }

    /// Use a [`BufReader`](tokio::io::BufReader) of `capacity` bytes as the
    /// reader wrapper.
    #[must_use]
    pub fn read_buffer(self, capacity: usize) -> Self { self.reader_wrapper(buffered_reader(capacity)) }

    /// Share an existing message pool.
    #[must_use]
    pub fn message_pool(mut self, pool: MessagePool) -> Self {
        self.messages = Some(pool);
        self
    }

    /// Share an existing context pool.
    #[must_use]
    pub fn context_pool(mut self, pool: ContextPool) -> Self {
        self.contexts = Some(pool);
        self
    }

    /// Validate the settings and build the handler.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the settings are invalid.
    pub fn build(self) -> Result<Arc<Handler>, ConfigError> {
        self.config.validate()?;
        Ok(Arc::new(Handler {
            config: self.config,
            router: self.routes.build(),
            hooks: self.hooks,
            messages: self.messages.unwrap_or_default(),
            contexts: self.contexts.unwrap_or_default(),
        }))
    }
}
