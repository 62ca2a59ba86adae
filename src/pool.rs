//! Object pools for message buffers and dispatch state.
//!
//! A [`Pool`] keeps a bounded free-list of values. [`Pool::acquire`] hands out
//! a [`Pooled`] guard which returns its value to the free-list when dropped,
//! so every exit path (normal return, early return, unwinding) releases the
//! value exactly once. Values are reset through [`Recycle`] before they become
//! available again; no state crosses a reuse boundary.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::BytesMut;

/// Default number of idle values kept by a pool.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Buffers whose capacity grew beyond this are not retained after use.
pub const MAX_RETAINED_BUFFER: usize = 64 * 1024;

/// Reset a value to its pristine state before it is reused.
pub trait Recycle {
    /// Clear all state carried over from the previous use.
    fn recycle(&mut self);
}

impl Recycle for BytesMut {
    fn recycle(&mut self) {
        if self.capacity() > MAX_RETAINED_BUFFER {
            *self = BytesMut::new();
        } else {
            self.clear();
        }
    }
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

struct Shared<T> {
    free: Mutex<Vec<T>>,
    max_idle: usize,
    factory: Factory<T>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Bounded free-list pool shared between connections.
pub struct Pool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max_idle", &self.shared.max_idle)
            .field("acquired", &self.shared.acquired.load(Ordering::Relaxed))
            .field("released", &self.shared.released.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Recycle + Default + Send + 'static> Default for Pool<T> {
    fn default() -> Self { Self::new(DEFAULT_MAX_IDLE, T::default) }
}

impl<T: Recycle + Default + Send + 'static> Pool<T> {
    /// Create a pool keeping at most `max_idle` values, building new ones
    /// with `factory` when the free-list is empty.
    pub fn new<F>(max_idle: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                free: Mutex::new(Vec::new()),
                max_idle,
                factory: Box::new(factory),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a value from the pool, creating one if none is idle.
    pub fn acquire(&self) -> Pooled<T> {
        let reused = self
            .shared
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let value = reused.unwrap_or_else(|| (self.shared.factory)());
        self.shared.acquired.fetch_add(1, Ordering::Relaxed);
        Pooled {
            value,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of values currently idle in the free-list.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.shared
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of values handed out and not yet returned.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        let released = self.shared.released.load(Ordering::Acquire);
        let acquired = self.shared.acquired.load(Ordering::Acquire);
        acquired.saturating_sub(released)
    }
}

/// Guard owning a pooled value; returns it to the pool on drop.
pub struct Pooled<T: Recycle + Default> {
    value: T,
    shared: Arc<Shared<T>>,
}

impl<T: Recycle + Default> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target { &self.value }
}

impl<T: Recycle + Default> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.value }
}

impl<T: Recycle + Default + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.value.fmt(f) }
}

impl<T: Recycle + Default> Drop for Pooled<T> {
    fn drop(&mut self) {
        let mut value = std::mem::take(&mut self.value);
        value.recycle();
        self.shared.released.fetch_add(1, Ordering::Release);
        let mut free = self
            .shared
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.shared.max_idle {
            free.push(value);
        }
    }
}

/// Pool of message byte buffers.
#[derive(Clone, Debug)]
pub struct MessagePool(Pool<BytesMut>);

impl Default for MessagePool {
    fn default() -> Self { Self::new(DEFAULT_MAX_IDLE) }
}

impl MessagePool {
    /// Create a message pool retaining at most `max_idle` buffers.
    #[must_use]
    pub fn new(max_idle: usize) -> Self { Self(Pool::new(max_idle, BytesMut::new)) }

    /// Acquire an empty buffer with room for at least `capacity` bytes.
    #[must_use]
    pub fn acquire(&self, capacity: usize) -> Pooled<BytesMut> {
        let mut buf = self.0.acquire();
        buf.reserve(capacity);
        buf
    }

    /// Number of idle buffers.
    #[must_use]
    pub fn idle(&self) -> usize { self.0.idle() }

    /// Number of buffers currently owned by messages.
    #[must_use]
    pub fn outstanding(&self) -> usize { self.0.outstanding() }
}
