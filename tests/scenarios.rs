//! End-to-end exchanges between a client and a peer.
//!
//! Some tests drive the peer by hand through a raw duplex stream so the bytes
//! on the wire can be checked exactly.

mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use common::{plain, server};
use rstest::rstest;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc,
};
use wirecall::{CallError, Cmd, Handler, message::HEAD_LEN};
use wirecall_testing::{
    LoggerHandle,
    client_pair,
    logger,
    probe_recv,
    raw_client,
    raw_frame,
    within,
};

const REQUEST: u8 = 1;
const RESPONSE: u8 = 2;
const NOTIFY: u8 = 3;
const ASYNC: u8 = 0b10;

#[rstest]
#[tokio::test]
async fn echo_request_is_answered_byte_for_byte(server: Arc<Handler>) {
    let (client, mut peer) = raw_client(server);
    peer.write_all(&raw_frame(REQUEST, 0, b"echo", b"hi", 7))
        .await
        .expect("write request");

    let mut reply = [0u8; HEAD_LEN + 2];
    within!(peer.read_exact(&mut reply)).expect("read reply");
    assert_eq!(reply[..], raw_frame(RESPONSE, 0, b"", b"hi", 7)[..]);
    client.close();
}

#[rstest]
#[tokio::test]
async fn seventh_call_carries_seq_seven(server: Arc<Handler>) {
    let probe = plain();
    let (caller, mut peer) = raw_client(plain());
    for _ in 0..6 {
        caller.notify("log", b"").await.expect("notify");
    }
    let call = tokio::spawn({
        let caller = caller.clone();
        async move { caller.call("echo", b"hi", Duration::from_secs(5)).await }
    });

    let mut request = None;
    for _ in 0..7 {
        request = Some(within!(probe_recv(&probe, &mut peer)).expect("read frame"));
    }
    let request = request.expect("seventh frame");
    assert_eq!(request.cmd(), Some(Cmd::Request));
    assert_eq!(request.seq(), 7);
    assert_eq!(request.method(), Ok("echo"));
    assert_eq!(request.body(), b"hi");

    // hand the request to a real server and relay its reply back
    let (relay, mut relay_peer) = raw_client(server);
    relay_peer
        .write_all(request.as_bytes())
        .await
        .expect("forward request");
    let reply = within!(probe_recv(&probe, &mut relay_peer)).expect("read reply");
    peer.write_all(reply.as_bytes()).await.expect("relay reply");

    let response = within!(call).expect("join call").expect("echo call");
    assert_eq!(response.seq(), 7);
    assert_eq!(response.body(), b"hi");
    caller.close();
    relay.close();
}

#[rstest]
#[tokio::test]
async fn notifications_get_no_response(server: Arc<Handler>) {
    let probe = plain();
    let (client, mut peer) = raw_client(server);
    let mut frames = raw_frame(NOTIFY, 0, b"log", b"x", 1);
    frames.extend(raw_frame(NOTIFY, 0, b"echo", b"y", 2));
    frames.extend(raw_frame(REQUEST, 0, b"echo", b"z", 3));
    peer.write_all(&frames).await.expect("write frames");

    let first = within!(probe_recv(&probe, &mut peer)).expect("read reply");
    assert_eq!(first.seq(), 3);
    assert_eq!(first.cmd(), Some(Cmd::Response));
    assert_eq!(first.body(), b"z");
    client.close();
}

#[rstest]
#[tokio::test]
async fn unrouted_call_times_out_and_connection_survives(
    server: Arc<Handler>,
    mut logger: LoggerHandle,
) {
    logger.clear();
    let (client, peer) = client_pair(plain(), server);
    for _ in 0..8 {
        client.notify("log", b"").await.expect("notify");
    }

    let result = client
        .call("nope", b"", Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(CallError::Timeout)));
    assert_eq!(client.correlator().pending(), 0);

    let response = within!(client.call("echo", b"still here", Duration::from_secs(5)))
        .expect("echo after timeout");
    assert_eq!(response.seq(), 10);
    assert_eq!(response.body(), b"still here");
    assert!(logger.contains_all(&["invalid method: [nope]", "seq=9"]));
    client.close();
    peer.close();
}

#[rstest]
#[tokio::test]
async fn duplicate_async_response_is_dropped(mut logger: LoggerHandle) {
    let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();
    let handler = Handler::builder()
        .route("ping", move |_ctx| {
            let ping_tx = ping_tx.clone();
            async move {
                let _ = ping_tx.send(());
            }
        })
        .expect("register ping")
        .build()
        .expect("build caller handler");
    let probe = plain();
    let (client, mut peer) = raw_client(handler);
    logger.clear();

    client.notify("log", b"").await.expect("notify");
    client.notify("log", b"").await.expect("notify");
    let invoked = Arc::new(AtomicUsize::new(0));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    client
        .call_async(
            "echo",
            b"later",
            {
                let invoked = Arc::clone(&invoked);
                move |outcome| {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    let _ = done_tx.send(outcome.map(|ctx| ctx.body().to_vec()));
                }
            },
            Duration::ZERO,
        )
        .await
        .expect("queue async call");

    let mut request = None;
    for _ in 0..3 {
        request = Some(within!(probe_recv(&probe, &mut peer)).expect("read frame"));
    }
    let request = request.expect("third frame");
    assert_eq!(request.seq(), 3);
    assert!(request.is_async());

    let reply = raw_frame(RESPONSE, ASYNC, b"", b"later", 3);
    let mut frames = reply.clone();
    frames.extend(reply);
    frames.extend(raw_frame(NOTIFY, 0, b"ping", b"", 1));
    peer.write_all(&frames).await.expect("write replies");

    within!(ping_rx.recv()).expect("ping handled");
    let outcome = within!(done_rx.recv()).expect("callback ran");
    assert_eq!(outcome.expect("success"), b"later");
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    assert!(logger.contains_all(&["async handler not exist or expired", "seq=3"]));
    client.close();
}
