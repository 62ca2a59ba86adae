//! Assertion macros shared by integration tests.

/// Await a call future and panic with contextual diagnostics on failure.
#[macro_export]
macro_rules! call_expect {
    ($fut:expr) => {{
        $fut.await
            .expect(concat!("call failed at ", file!(), ":", line!()))
    }};
    ($fut:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} at {}:{}", file!(), line!(), msg = $msg);
        $fut.await.expect(&m)
    }};
}

/// Await a future under a five second deadline, panicking if it expires.
#[macro_export]
macro_rules! within {
    ($fut:expr) => {{
        ::tokio::time::timeout(::std::time::Duration::from_secs(5), $fut)
            .await
            .expect(concat!("deadline exceeded at ", file!(), ":", line!()))
    }};
}

pub use crate::{call_expect, within};
