//! Tests for session binding, sending and teardown.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use rstest::{fixture, rstest};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
    time::{Duration, sleep, timeout},
};

use super::*;
use crate::middleware::{Middleware, MiddlewareError, Next};

/// Stage recording everything it sees. A `0xff` byte fails the stage.
#[derive(Default)]
struct Capture {
    seen: Mutex<Vec<u8>>,
    disconnects: AtomicUsize,
}

impl Middleware for Arc<Capture> {
    fn on_received(
        &self,
        _session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        _next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        if buffer.as_slice().contains(&0xff) {
            return Err(MiddlewareError::Other("poison byte".into()));
        }
        lock(&self.seen).extend_from_slice(buffer.as_slice());
        buffer.clear();
        Ok(())
    }

    fn on_disconnect(&self, _session: &Arc<Session>) { self.disconnects.fetch_add(1, Ordering::SeqCst); }
}

#[fixture]
fn capture() -> Arc<Capture> { Arc::new(Capture::default()) }

fn handlers(capture: &Arc<Capture>) -> SessionHandlers {
    SessionHandlers::new(Arc::new(
        MiddlewareChain::builder().push(Arc::clone(capture)).build(),
    ))
}

fn small_config() -> SessionConfig {
    SessionConfig {
        io_buffer_size: 4,
        max_buffered: 16,
        drain_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

fn bound(capture: &Arc<Capture>, config: SessionConfig) -> (Arc<Session>, DuplexStream) {
    let session = Arc::new(Session::new(config));
    let (local, remote) = duplex(1024);
    session
        .bind(local, None, handlers(capture))
        .expect("fresh session binds");
    (session, remote)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(1), async {
        while !condition() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[rstest]
#[tokio::test]
async fn received_bytes_reach_the_chain(capture: Arc<Capture>) {
    let (session, mut remote) = bound(&capture, SessionConfig::default());
    assert!(session.is_connected());
    assert_ne!(session.id(), SessionId::default());

    remote.write_all(b"hello").await.expect("write");
    wait_for(|| lock(&capture.seen).len() == 5).await;
    assert_eq!(lock(&capture.seen).as_slice(), b"hello");
}

#[rstest]
#[tokio::test]
async fn sends_arrive_in_order_across_chunks(capture: Arc<Capture>) {
    let (session, mut remote) = bound(&capture, small_config());
    session.send(b"abcdefghij").expect("send");
    session.send(b"").expect("empty send");
    session.send(b"klm").expect("send");

    let mut received = [0u8; 13];
    timeout(Duration::from_secs(1), remote.read_exact(&mut received))
        .await
        .expect("read timed out")
        .expect("read");
    assert_eq!(&received, b"abcdefghijklm");
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_never_interleave(capture: Arc<Capture>) {
    const SENDERS: u8 = 6;
    const PAYLOAD: usize = 37;
    let (session, mut remote) = bound(&capture, small_config());

    let senders: Vec<_> = (0..SENDERS)
        .map(|n| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session.send(&[b'a' + n; PAYLOAD]).expect("send");
            })
        })
        .collect();
    for sender in senders {
        sender.await.expect("sender task panicked");
    }

    let mut received = vec![0u8; usize::from(SENDERS) * PAYLOAD];
    timeout(Duration::from_secs(1), remote.read_exact(&mut received))
        .await
        .expect("read timed out")
        .expect("read");
    let mut runs: Vec<u8> = received
        .chunks(PAYLOAD)
        .map(|run| {
            assert!(run.iter().all(|b| *b == run[0]), "payloads interleaved: {run:?}");
            run[0]
        })
        .collect();
    runs.sort_unstable();
    assert_eq!(runs, (0..SENDERS).map(|n| b'a' + n).collect::<Vec<_>>());
}

#[rstest]
#[tokio::test]
async fn bytes_from_retired_binding_never_reach_the_next_one(capture: Arc<Capture>) {
    let (session, _remote) = bound(&capture, SessionConfig::default());
    let stale = session.current_binding().expect("bound session has a binding");
    assert!(session.close(false).await);

    let next = Arc::new(Capture::default());
    let (local, _next_remote) = duplex(64);
    session
        .bind(local, None, handlers(&next))
        .expect("unbound session rebinds");
    session
        .process_inbound(&stale, b"late")
        .expect("late bytes are dropped quietly");

    assert!(lock(&capture.seen).is_empty());
    assert!(lock(&next.seen).is_empty());
    assert!(lock(&session.buffer).is_empty());
    assert!(session.is_connected());
}

#[rstest]
#[tokio::test]
async fn close_is_idempotent_and_fires_disconnect_once(capture: Arc<Capture>) {
    let disconnected = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnected);
    let session = Arc::new(Session::default());
    let (local, _remote) = duplex(64);
    let hooks = SessionHooks::default().on_disconnected(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    session
        .bind(local, None, handlers(&capture).with_hooks(hooks))
        .expect("bind");

    assert!(session.close(false).await);
    assert!(!session.close(false).await);
    assert_eq!(session.state(), SessionState::Unbound);
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(capture.disconnects.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn send_after_close_fails(capture: Arc<Capture>) {
    let (session, _remote) = bound(&capture, SessionConfig::default());
    session.close(false).await;
    assert!(matches!(session.send(b"late"), Err(SessionError::NotConnected)));
    assert_eq!(session.pending_sends(), 0);
}

#[rstest]
#[tokio::test]
async fn graceful_close_flushes_queued_sends(capture: Arc<Capture>) {
    let (session, mut remote) = bound(&capture, small_config());
    session.send(b"goodbye").expect("send");
    assert!(session.close(true).await);

    let mut received = Vec::new();
    timeout(Duration::from_secs(1), remote.read_to_end(&mut received))
        .await
        .expect("read timed out")
        .expect("read");
    assert_eq!(received, b"goodbye");
}

#[rstest]
#[tokio::test]
async fn bind_twice_is_rejected(capture: Arc<Capture>) {
    let (session, _remote) = bound(&capture, SessionConfig::default());
    let (other, _other_remote) = duplex(64);
    assert!(matches!(
        session.bind(other, None, handlers(&capture)),
        Err(SessionError::AlreadyBound)
    ));
}

#[rstest]
#[tokio::test]
async fn peer_hangup_unbinds_and_releases(capture: Arc<Capture>) {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    let session = Arc::new(Session::default());
    let (local, remote) = duplex(64);
    session
        .bind(
            local,
            None,
            handlers(&capture).on_release(move |session| {
                assert_eq!(session.state(), SessionState::Unbound);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("bind");

    drop(remote);
    wait_for(|| released.load(Ordering::SeqCst) == 1).await;
    assert_eq!(capture.disconnects.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn middleware_error_reports_and_closes(capture: Arc<Capture>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let hooks = SessionHooks::default().on_exception(move |event| lock(&sink).push(event.source));
    let session = Arc::new(Session::default());
    let (local, mut remote) = duplex(64);
    session
        .bind(local, None, handlers(&capture).with_hooks(hooks))
        .expect("bind");

    remote.write_all(&[1, 0xff]).await.expect("write");
    wait_for(|| session.state() == SessionState::Unbound).await;
    assert_eq!(lock(&events).as_slice(), [ExceptionSource::Receive]);
}

#[tokio::test]
async fn buffer_limit_closes_session() {
    let session = Arc::new(Session::new(SessionConfig {
        max_buffered: 4,
        ..SessionConfig::default()
    }));
    // An empty chain never consumes, so bytes accumulate.
    let (local, mut remote) = duplex(64);
    session
        .bind(local, None, SessionHandlers::new(Arc::new(MiddlewareChain::default())))
        .expect("bind");

    remote.write_all(b"12345").await.expect("write");
    wait_for(|| session.state() == SessionState::Unbound).await;
}

#[rstest]
#[tokio::test]
async fn rebinding_resets_per_binding_state(capture: Arc<Capture>) {
    let (session, remote) = bound(&capture, SessionConfig::default());
    let first = session.id();
    session.tags().set("user", "alice");
    session.set_protocol(Protocol::Http);
    session.insert_extension(Arc::new(7_u32));
    drop(remote);
    wait_for(|| session.state() == SessionState::Unbound).await;

    let (local, _remote) = duplex(64);
    let second = session.bind(local, None, handlers(&capture)).expect("rebind");
    assert_ne!(first, second);
    assert!(session.tags().is_empty());
    assert_eq!(session.protocol(), Protocol::Unknown);
    assert!(session.extension::<u32>().is_none());
}

#[tokio::test]
async fn pool_recycles_session_after_disconnect() {
    let pool = Arc::new(SessionPool::new(SessionConfig::default()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");

    let client = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let (stream, _) = listener.accept().await.expect("accept");
    let handlers = SessionHandlers::new(Arc::new(MiddlewareChain::default()));
    let session = pool.bind_tcp(stream, handlers).expect("bind");
    assert!(session.remote_addr().is_some());
    assert_eq!(pool.get(session.id()).map(|s| s.id()), Some(session.id()));
    assert_eq!(pool.stats().active, 1);

    drop(client);
    wait_for(|| pool.stats().free == 1).await;
    assert_eq!(
        pool.stats(),
        PoolStats {
            created: 1,
            free: 1,
            active: 0,
            accept_failures: 0,
        }
    );
    let reused = pool.take().expect("recycled session");
    assert!(Arc::ptr_eq(&reused, &session));
}
