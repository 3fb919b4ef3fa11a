//! Session reuse across connections served by a `SocketServer`.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::try_join_all;
use sockframe::{
    ByteBuffer,
    Middleware,
    MiddlewareChain,
    MiddlewareError,
    Next,
    Session,
    SessionHooks,
    SocketServer,
    session::PoolStats,
};
use sockframe_testing::{TestResult, TestServer};

/// Replies to every chunk with how many chunks this binding has seen.
struct Counting;

impl Middleware for Counting {
    fn on_received(
        &self,
        session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        _next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        buffer.clear();
        let seen = session.tags().get_int("seen").unwrap_or(0) + 1;
        session.tags().set("seen", seen);
        let reply = u8::try_from(seen).unwrap_or(u8::MAX);
        session
            .send(&[reply])
            .map_err(|e| MiddlewareError::Other(Box::new(e)))
    }
}

fn counting_chain() -> MiddlewareChain { MiddlewareChain::builder().push(Counting).build() }

async fn until_idle(server: &TestServer) -> TestResult<PoolStats> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let stats = server.pool().stats();
            if stats.active == 0 {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(Into::into)
}

#[tokio::test]
async fn reused_session_starts_with_fresh_tags() -> TestResult {
    let server = TestServer::spawn(counting_chain()).await?;

    let mut first = server.connect().await?;
    first.write(b"a").await?;
    assert_eq!(first.read_exact(1).await?, [1]);
    first.write(b"b").await?;
    assert_eq!(first.read_exact(1).await?, [2]);
    first.shutdown().await?;
    drop(first);
    assert_eq!(until_idle(&server).await?.free, 1);

    let mut second = server.connect().await?;
    second.write(b"c").await?;
    assert_eq!(second.read_exact(1).await?, [1]);
    assert_eq!(server.pool().stats().created, 1);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_clients_keep_pool_balanced() -> TestResult {
    const CLIENTS: usize = 8;
    let server = TestServer::spawn(counting_chain()).await?;

    let mut wires = try_join_all((0..CLIENTS).map(|_| server.connect())).await?;
    for wire in &mut wires {
        wire.write(b"x").await?;
        assert_eq!(wire.read_exact(1).await?, [1]);
    }
    let busy = server.pool().stats();
    assert_eq!(busy.active, CLIENTS);
    assert_eq!(busy.created, CLIENTS as u64);
    drop(wires);

    let idle = until_idle(&server).await?;
    assert_eq!(idle.free, CLIENTS);
    assert_eq!(idle.created, idle.free as u64);
    assert_eq!(idle.accept_failures, 0);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn lifecycle_hooks_fire_once_per_connection() -> TestResult {
    let connected = Arc::new(AtomicUsize::new(0));
    let disconnected = Arc::new(AtomicUsize::new(0));
    let hooks = SessionHooks::default()
        .on_connected({
            let connected = Arc::clone(&connected);
            move |_| {
                connected.fetch_add(1, Ordering::SeqCst);
            }
        })
        .on_disconnected({
            let disconnected = Arc::clone(&disconnected);
            move |_| {
                disconnected.fetch_add(1, Ordering::SeqCst);
            }
        });
    let server = TestServer::spawn_with(SocketServer::new(counting_chain()).hooks(hooks)).await?;

    for _ in 0..3 {
        let mut wire = server.connect().await?;
        wire.write(b"x").await?;
        wire.read_exact(1).await?;
        drop(wire);
        until_idle(&server).await?;
    }
    assert_eq!(connected.load(Ordering::SeqCst), 3);
    assert_eq!(disconnected.load(Ordering::SeqCst), 3);
    assert_eq!(server.pool().stats().created, 1);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_retires_active_sessions() -> TestResult {
    let server = TestServer::spawn(counting_chain()).await?;
    let mut wire = server.connect().await?;
    wire.write(b"x").await?;
    wire.read_exact(1).await?;
    let pool = Arc::clone(server.pool());

    server.shutdown().await?;
    assert!(wire.read_to_close().await?.is_empty());
    let stats = pool.stats();
    assert_eq!((stats.active, stats.free, stats.created), (0, 0, 0));
    Ok(())
}
