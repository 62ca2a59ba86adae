//! Handlers shared by the integration tests.
#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use std::{sync::Arc, time::Duration};

use rstest::fixture;
use wirecall::{Context, Handler, HandlerBuilder};

/// Routes served by the integration suite's server end:
///
/// - `echo` replies with the request body;
/// - `log` does nothing, so notifications to it leave no trace on the wire;
/// - `sleep` waits for the big-endian millisecond count in its body, then
///   echoes it;
/// - `boom` panics.
pub fn server_builder() -> HandlerBuilder {
    Handler::builder()
        .route("echo", |ctx| async move {
            let body = ctx.body().to_vec();
            let _ = ctx.write(&body).await;
        })
        .and_then(|b| b.route("log", |_ctx| async {}))
        .and_then(|b| b.route("sleep", sleep))
        .and_then(|b| b.route("boom", boom))
        .expect("register server routes")
}

async fn sleep(ctx: Context) {
    let millis = <[u8; 8]>::try_from(ctx.body())
        .map(u64::from_be_bytes)
        .unwrap_or_default();
    tokio::time::sleep(Duration::from_millis(millis)).await;
    let body = ctx.body().to_vec();
    let _ = ctx.write(&body).await;
}

async fn boom(_ctx: Context) { panic!("boom"); }

#[fixture]
pub fn server() -> Arc<Handler> {
    server_builder().build().expect("build server handler")
}

/// Handler with no routes, for callers and for decoding raw streams.
#[fixture]
pub fn plain() -> Arc<Handler> {
    Handler::builder().build().expect("build plain handler")
}
