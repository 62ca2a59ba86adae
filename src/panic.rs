//! Panic isolation for user code.
//!
//! Handlers and async callbacks run inside these guards so a panic becomes a
//! [`PanicMessage`] value instead of unwinding through the receive loop.

use std::{
    any::Any,
    fmt,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
};

use futures::FutureExt;

/// Wrapper that formats a panic payload when logged or displayed.
///
/// The payload is downcast to `String` or `&'static str` if possible and falls
/// back to `Debug` formatting otherwise.
///
/// ```
/// use wirecall::panic::format_panic;
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert!(format_panic(Box::new(5_u32)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// Run `f`, converting a panic into an error value.
///
/// # Errors
///
/// Returns the formatted panic payload if `f` panics.
///
/// ```
/// use wirecall::panic::guard_call;
///
/// assert_eq!(guard_call(|| 2 + 2).ok(), Some(4));
/// assert_eq!(
///     guard_call(|| -> u8 { panic!("boom") }).unwrap_err().to_string(),
///     "boom"
/// );
/// ```
pub fn guard_call<T>(f: impl FnOnce() -> T) -> Result<T, PanicMessage> {
    catch_unwind(AssertUnwindSafe(f)).map_err(format_panic)
}

/// Drive `fut` to completion, converting a panic during any poll into an
/// error value.
///
/// # Errors
///
/// Returns the formatted panic payload if `fut` panics.
pub async fn guard_future<F>(fut: F) -> Result<F::Output, PanicMessage>
where
    F: Future,
{
    AssertUnwindSafe(fut).catch_unwind().await.map_err(format_panic)
}
