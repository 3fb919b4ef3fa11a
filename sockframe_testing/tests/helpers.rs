//! Exercises the shared helpers against real sessions.

use std::sync::Arc;

use sockframe::{ByteBuffer, Middleware, MiddlewareChain, MiddlewareError, Next, Session};
use sockframe_testing::{SessionPair, TestResult, TestServer, unused_listener};

struct Upper;

impl Middleware for Upper {
    fn on_received(
        &self,
        session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        _next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        let reply = buffer.as_slice().to_ascii_uppercase();
        buffer.clear();
        session
            .send(&reply)
            .map_err(|e| MiddlewareError::Other(Box::new(e)))
    }
}

fn upper_chain() -> MiddlewareChain { MiddlewareChain::builder().push(Upper).build() }

#[test]
fn unused_listener_binds_loopback() -> TestResult {
    let listener = unused_listener()?;
    assert!(listener.local_addr()?.ip().is_loopback());
    Ok(())
}

#[tokio::test]
async fn session_pair_round_trip() -> TestResult {
    let mut pair = SessionPair::bind(upper_chain())?;
    pair.wire.write(b"abc").await?;
    assert_eq!(pair.wire.read_exact(3).await?, b"ABC");

    pair.session.close(true).await;
    assert!(pair.wire.read_to_close().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_server_serves_and_stops() -> TestResult {
    let server = TestServer::spawn(upper_chain()).await?;
    let mut wire = server.connect().await?;
    wire.write(b"hey").await?;
    assert_eq!(wire.read_exact(3).await?, b"HEY");
    assert_eq!(server.pool().stats().active, 1);

    server.shutdown().await?;
    wire.read_to_close().await?;
    Ok(())
}
