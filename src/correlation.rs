//! Correlation of responses with outstanding calls.
//!
//! Each connection owns a [`Correlator`] with two tables keyed by sequence
//! number: blocking sessions waiting on a one-shot slot, and async callbacks.
//! Entries leave a table only through [`DashMap::remove`], so when a late
//! response, a timeout and a connection close race for the same entry exactly
//! one of them receives it and the others observe a miss.

use dashmap::DashMap;
use log::warn;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{context::Context, error::CallError, message::Message, panic::guard_call};

/// Callback receiving the outcome of an async call.
pub struct AsyncCallback(Box<dyn FnOnce(Result<Context, CallError>) + Send + Sync + 'static>);

impl AsyncCallback {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<Context, CallError>) + Send + Sync + 'static,
    {
        Self(Box::new(f))
    }

    pub(crate) fn invoke(self, outcome: Result<Context, CallError>) { (self.0)(outcome) }
}

impl std::fmt::Debug for AsyncCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AsyncCallback")
    }
}

/// Receiving side of a registered session.
#[derive(Debug)]
pub struct SessionWait {
    seq: u64,
    rx: oneshot::Receiver<Message>,
}

impl SessionWait {
    /// Sequence number this session waits on.
    #[must_use]
    pub fn seq(&self) -> u64 { self.seq }

    pub(crate) fn into_receiver(self) -> oneshot::Receiver<Message> { self.rx }
}

struct PendingCallback {
    callback: AsyncCallback,
    taken: CancellationToken,
}

/// Per-connection tables of outstanding calls.
#[derive(Default)]
pub struct Correlator {
    sessions: DashMap<u64, oneshot::Sender<Message>>,
    callbacks: DashMap<u64, PendingCallback>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("sessions", &self.sessions.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Correlator {
    /// Create empty tables.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a blocking wait for `seq`.
    pub fn register_session(&self, seq: u64) -> SessionWait {
        debug_assert!(
            !self.callbacks.contains_key(&seq),
            "seq {seq} already awaits an async callback"
        );
        let (tx, rx) = oneshot::channel();
        self.sessions.insert(seq, tx);
        SessionWait { seq, rx }
    }

    /// Deliver `message` to the session waiting on `seq`.
    ///
    /// Returns `false` when no session is registered or its caller has gone;
    /// the message is dropped here, returning its buffer to the pool.
    pub fn resolve_session(&self, seq: u64, message: Message) -> bool {
        match self.sessions.remove(&seq) {
            Some((_, tx)) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Remove the session for `seq`. Returns `true` if this call removed it.
    pub fn cancel_session(&self, seq: u64) -> bool { self.sessions.remove(&seq).is_some() }

    /// Register `callback` for the response to `seq`.
    ///
    /// The returned token is cancelled when the callback leaves the table,
    /// whoever takes it.
    pub fn register_async(&self, seq: u64, callback: AsyncCallback) -> CancellationToken {
        debug_assert!(
            !self.sessions.contains_key(&seq),
            "seq {seq} already awaits a session"
        );
        let taken = CancellationToken::new();
        self.callbacks.insert(
            seq,
            PendingCallback {
                callback,
                taken: taken.clone(),
            },
        );
        taken
    }

    /// Take and remove the callback for `seq`.
    ///
    /// At most one caller receives a given callback.
    pub fn take_async(&self, seq: u64) -> Option<AsyncCallback> {
        self.callbacks.remove(&seq).map(|(_, pending)| {
            pending.taken.cancel();
            pending.callback
        })
    }

    /// Number of waiting sessions.
    #[must_use]
    pub fn pending_sessions(&self) -> usize { self.sessions.len() }

    /// Number of registered callbacks.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize { self.callbacks.len() }

    /// Total number of outstanding calls.
    #[must_use]
    pub fn pending(&self) -> usize { self.pending_sessions() + self.pending_callbacks() }

    /// Whether `seq` is present in either table.
    #[must_use]
    pub fn contains(&self, seq: u64) -> bool {
        self.sessions.contains_key(&seq) || self.callbacks.contains_key(&seq)
    }

    /// Fail every outstanding call with [`CallError::Closed`].
    ///
    /// Waiting sessions are woken; callbacks run once under the panic guard.
    /// Returns the number of calls failed.
    pub fn close(&self) -> usize {
        let mut sessions = 0;
        self.sessions.retain(|_, _| {
            sessions += 1;
            false
        });

        let seqs: Vec<u64> = self.callbacks.iter().map(|entry| *entry.key()).collect();
        let mut callbacks = 0;
        for seq in seqs {
            let Some(callback) = self.take_async(seq) else {
                continue;
            };
            callbacks += 1;
            if let Err(panic) = guard_call(|| callback.invoke(Err(CallError::Closed))) {
                warn!("async callback panicked on close: seq={seq}, panic={panic}");
            }
        }
        sessions + callbacks
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use rstest::{fixture, rstest};

    use super::*;
    use crate::pool::MessagePool;

    #[fixture]
    fn correlator() -> Correlator { Correlator::new() }

    #[fixture]
    fn pool() -> MessagePool { MessagePool::new(8) }

    fn response(pool: &MessagePool, seq: u64) -> Message {
        Message::response(pool, seq, false, b"ok").expect("build response")
    }

    #[rstest]
    #[tokio::test]
    async fn resolved_session_wakes_waiter(correlator: Correlator, pool: MessagePool) {
        let wait = correlator.register_session(7);
        assert!(correlator.resolve_session(7, response(&pool, 7)));
        let msg = wait.into_receiver().await.expect("delivered");
        assert_eq!(msg.body(), b"ok");
        assert!(!correlator.contains(7));
    }

    #[rstest]
    fn miss_releases_the_message(correlator: Correlator, pool: MessagePool) {
        assert!(!correlator.resolve_session(9, response(&pool, 9)));
        assert_eq!(pool.outstanding(), 0);
    }

    #[rstest]
    fn abandoned_waiter_releases_the_message(correlator: Correlator, pool: MessagePool) {
        let wait = correlator.register_session(4);
        drop(wait);
        assert!(!correlator.resolve_session(4, response(&pool, 4)));
        assert_eq!(pool.outstanding(), 0);
    }

    #[rstest]
    fn cancelled_session_is_absent(correlator: Correlator, pool: MessagePool) {
        let _wait = correlator.register_session(1);
        assert!(correlator.cancel_session(1));
        assert!(!correlator.cancel_session(1));
        assert!(!correlator.resolve_session(1, response(&pool, 1)));
    }

    #[rstest]
    fn async_callback_is_taken_once(correlator: Correlator) {
        correlator.register_async(3, AsyncCallback::new(|_| {}));
        assert!(correlator.take_async(3).is_some());
        assert!(correlator.take_async(3).is_none());
        assert!(!correlator.contains(3));
    }

    #[rstest]
    fn concurrent_takers_have_exactly_one_winner(correlator: Correlator) {
        let correlator = Arc::new(correlator);
        for seq in 0..200 {
            correlator.register_async(seq, AsyncCallback::new(|_| {}));
        }
        let wins = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let correlator = Arc::clone(&correlator);
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    for seq in 0..200 {
                        if correlator.take_async(seq).is_some() {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("taker panicked");
        }
        assert_eq!(wins.load(Ordering::SeqCst), 200);
        assert_eq!(correlator.pending_callbacks(), 0);
    }

    #[rstest]
    fn resolve_and_cancel_race_has_one_winner(pool: MessagePool) {
        for seq in 0..200 {
            let correlator = Arc::new(Correlator::new());
            let wait = correlator.register_session(seq);
            let resolver = {
                let correlator = Arc::clone(&correlator);
                let msg = response(&pool, seq);
                thread::spawn(move || correlator.resolve_session(seq, msg))
            };
            let cancelled = correlator.cancel_session(seq);
            let delivered = resolver.join().expect("resolver panicked");
            assert!(delivered ^ cancelled, "seq {seq}: exactly one side must win");
            assert!(!correlator.contains(seq));
            drop(wait);
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn close_fails_everything_once(correlator: Correlator) {
        let wait = correlator.register_session(1);
        let closed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closed);
        correlator.register_async(
            2,
            AsyncCallback::new(move |outcome| {
                if matches!(outcome, Err(CallError::Closed)) {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        correlator.register_async(3, AsyncCallback::new(|_| panic!("callback boom")));

        assert_eq!(correlator.pending(), 3);
        assert_eq!(correlator.close(), 3);
        assert_eq!(correlator.pending(), 0);
        assert!(wait.into_receiver().await.is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(correlator.close(), 0);
    }

    #[rstest]
    fn taking_a_callback_cancels_its_token(correlator: Correlator) {
        let taken = correlator.register_async(5, AsyncCallback::new(|_| {}));
        assert!(!taken.is_cancelled());
        assert!(correlator.take_async(5).is_some());
        assert!(taken.is_cancelled());

        let closed = correlator.register_async(6, AsyncCallback::new(|_| {}));
        assert_eq!(correlator.close(), 1);
        assert!(closed.is_cancelled());
    }

    #[rstest]
    fn close_counts_only_the_sessions_it_failed(pool: MessagePool) {
        for round in 0..50 {
            let correlator = Arc::new(Correlator::new());
            let waits: Vec<_> = (0..64).map(|seq| correlator.register_session(seq)).collect();
            let responses: Vec<_> = (0..64).map(|seq| response(&pool, seq)).collect();
            let resolver = {
                let correlator = Arc::clone(&correlator);
                thread::spawn(move || {
                    let mut delivered = 0;
                    for msg in responses {
                        if correlator.resolve_session(msg.seq(), msg) {
                            delivered += 1;
                        }
                    }
                    delivered
                })
            };
            let failed = correlator.close();
            let delivered = resolver.join().expect("resolver panicked");
            assert_eq!(failed + delivered, 64, "round {round}");
            drop(waits);
        }
        assert_eq!(pool.outstanding(), 0);
    }
}
