//! Unit tests for the per-connection client.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rstest::{fixture, rstest};
use tokio::{
    io::{AsyncWriteExt, DuplexStream, duplex},
    sync::oneshot,
    time::timeout,
};

use super::*;
use crate::{
    config::{DispatchMode, RecoveryPolicy},
    connection::ConnectionId,
    message::Cmd,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(bincode::Encode, bincode::Decode, Debug, PartialEq)]
struct Add {
    a: u32,
    b: u32,
}

#[fixture]
fn server() -> Arc<Handler> {
    Handler::builder()
        .route("echo", |ctx| async move {
            let body = ctx.body().to_vec();
            ctx.write(&body).await.expect("reply to echo");
        })
        .and_then(|b| {
            b.route("fail", |ctx| async move {
                ctx.write_error("nope").await.expect("reply to fail");
            })
        })
        .and_then(|b| b.route("silent", |_ctx| async {}))
        .and_then(|b| {
            b.route("add", |ctx| async move {
                let Add { a, b } = ctx.bind().expect("decode add");
                ctx.write_value(&(a + b)).await.expect("reply to add");
            })
        })
        .expect("register routes")
        .build()
        .expect("build server handler")
}

fn plain() -> Arc<Handler> { Handler::builder().build().expect("build plain handler") }

fn pair(server: Arc<Handler>, client: Arc<Handler>) -> (Client, Client) {
    let (a, b) = duplex(64 * 1024);
    (Client::new(a, client), Client::new(b, server))
}

fn raw(handler: Arc<Handler>) -> (Client, DuplexStream) {
    let (local, remote) = duplex(64 * 1024);
    (Client::new(local, handler), remote)
}

fn probe_info() -> ConnectionInfo { ConnectionInfo::new(ConnectionId::new(0), None) }

#[rstest]
#[tokio::test]
async fn call_returns_the_response(server: Arc<Handler>) {
    let (client, peer) = pair(server, plain());
    let response = client
        .call("echo", b"hello", WAIT)
        .await
        .expect("echo call");
    assert_eq!(response.cmd(), Some(Cmd::Response));
    assert_eq!(response.body(), b"hello");
    assert_eq!(client.correlator().pending(), 0);
    client.close();
    peer.close();
}

#[rstest]
#[tokio::test]
async fn error_response_becomes_remote_error(server: Arc<Handler>) {
    let (client, peer) = pair(server, plain());
    let result = client.call("fail", b"", WAIT).await;
    assert!(matches!(result, Err(CallError::Remote(reason)) if reason == "nope"));
    client.close();
    peer.close();
}

#[rstest]
#[tokio::test]
async fn unanswered_call_times_out(server: Arc<Handler>) {
    let (client, peer) = pair(server, plain());
    let result = client
        .call("silent", b"", Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(CallError::Timeout)));
    assert_eq!(client.correlator().pending(), 0);
    client.close();
    peer.close();
}

#[rstest]
#[tokio::test]
async fn typed_calls_use_bincode(server: Arc<Handler>) {
    let (client, peer) = pair(server, plain());
    let sum: u32 = client
        .call_value("add", &Add { a: 2, b: 40 }, WAIT)
        .await
        .expect("add call");
    assert_eq!(sum, 42);
    client.close();
    peer.close();
}

#[rstest]
#[tokio::test]
async fn async_call_runs_callback_once(server: Arc<Handler>) {
    let (client, peer) = pair(server, plain());
    let (tx, rx) = oneshot::channel();
    client
        .call_async(
            "echo",
            b"later",
            move |outcome| {
                let _ = tx.send(outcome.map(|ctx| ctx.body().to_vec()));
            },
            WAIT,
        )
        .await
        .expect("queue async call");

    let outcome = timeout(WAIT, rx).await.expect("callback in time");
    assert_eq!(outcome.expect("callback ran").expect("success"), b"later");
    assert_eq!(client.correlator().pending_callbacks(), 0);
    client.close();
    peer.close();
}

#[rstest]
#[tokio::test]
async fn async_call_times_out(server: Arc<Handler>) {
    let (client, peer) = pair(server, plain());
    let (tx, rx) = oneshot::channel();
    client
        .call_async(
            "silent",
            b"",
            move |outcome| {
                let _ = tx.send(matches!(outcome, Err(CallError::Timeout)));
            },
            Duration::from_millis(50),
        )
        .await
        .expect("queue async call");

    assert!(timeout(WAIT, rx).await.expect("callback in time").expect("ran"));
    assert_eq!(client.correlator().pending(), 0);
    client.close();
    peer.close();
}

#[rstest]
#[tokio::test]
async fn close_fails_pending_calls(server: Arc<Handler>) {
    let (client, peer) = pair(server, plain());
    let (tx, rx) = oneshot::channel();
    client
        .call_async(
            "silent",
            b"",
            move |outcome| {
                let _ = tx.send(matches!(outcome, Err(CallError::Closed)));
            },
            Duration::ZERO,
        )
        .await
        .expect("queue async call");
    let blocked = tokio::spawn({
        let client = client.clone();
        async move { client.call("silent", b"", Duration::from_secs(60)).await }
    });
    while client.correlator().pending() < 2 {
        tokio::task::yield_now().await;
    }

    client.close();

    let result = timeout(WAIT, blocked)
        .await
        .expect("call resolved")
        .expect("join call task");
    assert!(matches!(result, Err(CallError::Closed)));
    assert!(timeout(WAIT, rx).await.expect("callback in time").expect("ran"));
    assert!(matches!(
        client.notify("echo", b"").await,
        Err(CallError::Send(SendError::Closed))
    ));
    timeout(WAIT, client.closed()).await.expect("tasks finish");
    peer.close();
}

#[tokio::test]
async fn peer_hangup_closes_the_client() {
    let (client, remote) = raw(plain());
    drop(remote);
    timeout(WAIT, client.closed()).await.expect("client closes");
    assert!(client.is_closed());
}

#[tokio::test]
async fn sequence_numbers_start_at_one() {
    let probe = plain();
    let (client, mut remote) = raw(plain());
    client.notify("first", b"").await.expect("notify");
    client.notify("second", b"").await.expect("notify");

    let first = probe.recv(&probe_info(), &mut remote).await.expect("first");
    let second = probe.recv(&probe_info(), &mut remote).await.expect("second");
    assert_eq!((first.seq(), second.seq()), (1, 2));
    assert_eq!(first.cmd(), Some(Cmd::Notify));
    assert_eq!(second.method(), Ok("second"));
    client.close();
}

#[tokio::test]
async fn try_notify_reports_a_full_queue() {
    let handler = Handler::builder()
        .send_queue_size(1)
        .build()
        .expect("build handler");
    let (local, _remote) = duplex(16);
    let client = Client::new(local, handler);
    let body = [0u8; 64];

    let mut full = false;
    for _ in 0..16 {
        match client.try_notify("fill", &body) {
            Ok(()) => tokio::task::yield_now().await,
            Err(CallError::Send(SendError::QueueFull)) => {
                full = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(full, "queue never filled");
    client.close();
}

#[rstest]
#[tokio::test]
async fn spawned_handlers_may_call_back(server: Arc<Handler>) {
    let relay = server
        .to_builder()
        .route("relay", |ctx| async move {
            let pong = ctx
                .client()
                .call("ping", ctx.body(), WAIT)
                .await
                .expect("nested call");
            ctx.write(pong.body()).await.expect("reply to relay");
        })
        .expect("register relay")
        .dispatch(DispatchMode::Spawn)
        .build()
        .expect("build relay handler");
    let caller = Handler::builder()
        .route("ping", |ctx| async move {
            let mut body = ctx.body().to_vec();
            body.extend_from_slice(b"-pong");
            ctx.write(&body).await.expect("reply to ping");
        })
        .expect("register ping")
        .build()
        .expect("build caller handler");

    let (client, peer) = pair(relay, caller);
    let response = client
        .call("relay", b"ping", WAIT)
        .await
        .expect("relay call");
    assert_eq!(response.body(), b"ping-pong");
    client.close();
    peer.close();
}

fn invalid_then_valid() -> Vec<u8> {
    // method length 9 does not fit in a body of 2
    let mut bytes = vec![0, 0, 0, 2, 0, 1, 0, 9, 0, 0, 0, 0, 0, 0, 0, 1, b'x', b'y'];
    bytes.extend_from_slice(&[0, 0, 0, 6, 0, 1, 0, 4, 0, 0, 0, 0, 0, 0, 0, 2]);
    bytes.extend_from_slice(b"echohi");
    bytes
}

#[rstest]
#[tokio::test]
async fn drop_policy_skips_invalid_frames(server: Arc<Handler>) {
    let probe = plain();
    let (client, mut remote) = raw(server);
    remote
        .write_all(&invalid_then_valid())
        .await
        .expect("write frames");

    let reply = timeout(WAIT, probe.recv(&probe_info(), &mut remote))
        .await
        .expect("reply in time")
        .expect("reply");
    assert_eq!(reply.seq(), 2);
    assert_eq!(reply.body(), b"hi");
    assert!(!client.is_closed());
    client.close();
}

#[rstest]
#[tokio::test]
async fn disconnect_policy_closes_on_invalid_frames(server: Arc<Handler>) {
    let strict = server
        .to_builder()
        .violation_policy(RecoveryPolicy::Disconnect)
        .build()
        .expect("build strict handler");
    let (client, mut remote) = raw(strict);
    remote
        .write_all(&invalid_then_valid())
        .await
        .expect("write frames");

    timeout(WAIT, client.closed()).await.expect("client closes");
}

#[rstest]
#[tokio::test]
async fn vetoed_sends_are_dropped(server: Arc<Handler>) {
    let vetoes = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&vetoes);
    let muted = Handler::builder()
        .before_send(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(std::io::Error::other("first write muted"))
            } else {
                Ok(())
            }
        })
        .build()
        .expect("build muted handler");
    let (client, peer) = pair(server, muted);

    client.notify("echo", b"lost").await.expect("queue notify");
    while vetoes.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    let response = client
        .call("echo", b"kept", WAIT)
        .await
        .expect("call after veto");
    assert_eq!(response.body(), b"kept");
    assert!(vetoes.load(Ordering::SeqCst) >= 2);
    client.close();
    peer.close();
}

fn stalled(queue: usize) -> (Client, DuplexStream) {
    let handler = Handler::builder()
        .send_queue_size(queue)
        .build()
        .expect("build handler");
    let (local, remote) = duplex(32);
    (Client::new(local, handler), remote)
}

#[tokio::test]
async fn call_deadline_covers_a_full_queue() {
    let (client, _remote) = stalled(1);
    for attempt in 0..4 {
        let result = timeout(
            Duration::from_secs(2),
            client.call("echo", &[0; 64], Duration::from_millis(50)),
        )
        .await
        .unwrap_or_else(|_| panic!("call {attempt} ignored its deadline"));
        assert!(matches!(result, Err(CallError::Timeout)), "call {attempt}");
    }
    assert_eq!(client.correlator().pending(), 0);
    client.close();
}

#[tokio::test]
async fn async_call_deadline_covers_a_full_queue() {
    let (client, _remote) = stalled(1);
    let invoked = Arc::new(AtomicUsize::new(0));
    let mut timed_out = 0;
    for _ in 0..4 {
        let seen = Arc::clone(&invoked);
        let queued = timeout(
            Duration::from_secs(2),
            client.call_async(
                "echo",
                &[0; 64],
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_millis(50),
            ),
        )
        .await
        .expect("queueing respects the deadline");
        if matches!(queued, Err(CallError::Timeout)) {
            timed_out += 1;
        }
    }
    assert!(timed_out > 0, "the queue never filled");

    // requests that made it into the queue expire through their callbacks
    timeout(WAIT, async {
        while client.correlator().pending_callbacks() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("callbacks expire");
    assert_eq!(invoked.load(Ordering::SeqCst) + timed_out, 4);
    client.close();
}

#[tokio::test]
async fn abandoned_calls_leave_no_entries() {
    let (client, _peer) = pair(plain(), plain());
    for _ in 0..10 {
        let abandoned = timeout(
            Duration::from_millis(10),
            client.call("nothing", b"", Duration::from_secs(60)),
        )
        .await;
        assert!(abandoned.is_err());
    }
    assert_eq!(client.correlator().pending_sessions(), 0);

    let (stuck, _remote) = stalled(1);
    for _ in 0..4 {
        let _ = timeout(
            Duration::from_millis(10),
            stuck.call_async("echo", &[0; 64], |_| {}, Duration::ZERO),
        )
        .await;
    }
    // one request is being written and one waits in the queue
    assert_eq!(stuck.correlator().pending_callbacks(), 2);
    client.close();
    stuck.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_racing_an_async_call_reports_once() {
    for round in 0..64 {
        let (client, _remote) = raw(plain());
        let invoked = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&invoked);
        let closer = tokio::spawn({
            let client = client.clone();
            async move { client.close() }
        });
        let result = client
            .call_async(
                "echo",
                b"",
                move |outcome| {
                    assert!(matches!(outcome, Err(CallError::Closed)));
                    seen.fetch_add(1, Ordering::SeqCst);
                },
                Duration::ZERO,
            )
            .await;
        closer.await.expect("join closer");

        let reports = invoked.load(Ordering::SeqCst) + usize::from(result.is_err());
        assert_eq!(reports, 1, "round {round}: {result:?}");
        assert_eq!(client.correlator().pending(), 0);
    }
}

#[rstest]
#[tokio::test]
async fn answered_async_call_releases_its_expiry_task(server: Arc<Handler>) {
    let (client, peer) = pair(server, plain());
    let (tx, rx) = oneshot::channel();
    client
        .call_async(
            "echo",
            b"quick",
            move |outcome| {
                let _ = tx.send(outcome.is_ok());
            },
            Duration::from_secs(3600),
        )
        .await
        .expect("queue async call");
    assert!(timeout(WAIT, rx).await.expect("callback in time").expect("ran"));

    // only the receive and send loops remain
    timeout(WAIT, async {
        while client.inner.tracker.len() > 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("expiry task ends with the response");
    client.close();
    peer.close();
}
