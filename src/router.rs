//! Method routing.
//!
//! Routes are registered on a [`RouterBuilder`] during setup and frozen into
//! a [`Router`] by [`RouterBuilder::build`]. A built router is immutable and
//! cheap to clone, so every connection can look up handlers concurrently
//! without locking.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use thiserror::Error;

use crate::{context::Context, message::MAX_METHOD_LEN};

/// A boxed future that is `Send` with a specified lifetime.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler invoked for a routed request or notification.
///
/// The handler owns the [`Context`] for the duration of the call; dropping
/// the context returns it and its message to their pools.
pub type HandlerFn = Arc<dyn Fn(Context) -> BoxFuture<'static, ()> + Send + Sync>;

/// Adapt an async closure into a [`HandlerFn`].
///
/// ```
/// use wirecall::router::handler_fn;
///
/// let _echo = handler_fn(|ctx| async move {
///     let body = ctx.body().to_vec();
///     let _ = ctx.write(&body).await;
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Errors raised while registering routes.
///
/// These indicate programming mistakes and should abort startup.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteError {
    /// A handler for the method was already registered.
    #[error("handler already registered for method {0:?}")]
    DuplicateMethod(String),
    /// The method name exceeds [`MAX_METHOD_LEN`].
    #[error("invalid method length {len} (> MAX_METHOD_LEN {max}) for {method:?}")]
    MethodTooLong {
        /// Offending method name.
        method: String,
        /// Its length in bytes.
        len: usize,
        /// Maximum permitted length.
        max: usize,
    },
    /// Empty method names cannot be routed.
    #[error("method name must not be empty")]
    EmptyMethod,
}

/// Collects routes during setup.
#[derive(Clone, Default)]
pub struct RouterBuilder {
    routes: HashMap<String, HandlerFn>,
}

impl RouterBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `handler` for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::DuplicateMethod`] if `method` is already routed,
    /// [`RouteError::MethodTooLong`] if it exceeds [`MAX_METHOD_LEN`] bytes and
    /// [`RouteError::EmptyMethod`] if it is empty.
    pub fn route(mut self, method: impl Into<String>, handler: HandlerFn) -> Result<Self, RouteError> {
        let method = method.into();
        if method.is_empty() {
            return Err(RouteError::EmptyMethod);
        }
        if method.len() > MAX_METHOD_LEN {
            return Err(RouteError::MethodTooLong {
                len: method.len(),
                max: MAX_METHOD_LEN,
                method,
            });
        }
        if self.routes.contains_key(&method) {
            return Err(RouteError::DuplicateMethod(method));
        }
        self.routes.insert(method, handler);
        Ok(self)
    }

    /// Freeze the registered routes.
    #[must_use]
    pub fn build(self) -> Router {
        Router {
            routes: Arc::new(self.routes),
        }
    }
}

/// Immutable method table shared by all connections.
#[derive(Clone, Default)]
pub struct Router {
    routes: Arc<HashMap<String, HandlerFn>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.routes.keys()).finish()
    }
}

impl Router {
    /// Look up the handler for `method`.
    #[must_use]
    pub fn lookup(&self, method: &str) -> Option<&HandlerFn> { self.routes.get(method) }

    /// Look up the handler for `method`, also returning the router's own copy
    /// of the name.
    pub(crate) fn lookup_entry(&self, method: &str) -> Option<(&str, &HandlerFn)> {
        self.routes
            .get_key_value(method)
            .map(|(name, handler)| (name.as_str(), handler))
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize { self.routes.len() }

    /// Whether no methods are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    /// Iterate over the registered method names.
    pub fn methods(&self) -> impl Iterator<Item = &str> { self.routes.keys().map(String::as_str) }

    /// Copy the routes into a builder for further registration.
    #[must_use]
    pub fn to_builder(&self) -> RouterBuilder {
        RouterBuilder {
            routes: self.routes.as_ref().clone(),
        }
    }
}
