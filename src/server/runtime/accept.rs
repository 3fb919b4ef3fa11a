//! Accept loop feeding the session pool.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffConfig;
use crate::{
    hooks::{ExceptionEvent, ExceptionSource},
    session::{SessionHandlers, SessionPool},
};

/// Source of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> { TcpListener::accept(self).await }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Where accepted connections go.
#[derive(Clone, Debug)]
pub(in crate::server) struct AcceptTarget {
    pub pool: Arc<SessionPool>,
    pub handlers: SessionHandlers,
}

#[derive(Debug)]
pub(in crate::server) struct AcceptLoopOptions {
    pub shutdown: CancellationToken,
    pub backoff: BackoffConfig,
}

/// Accept connections from `listener` until `shutdown` is cancelled.
///
/// Each accepted stream is bound to a session from the target pool; a
/// session that cannot be produced or bound is reported through the
/// exception hook and the connection dropped. Accept failures back off
/// exponentially as configured by `backoff`.
pub(in crate::server) async fn accept_loop<L>(listener: Arc<L>, target: AcceptTarget, options: AcceptLoopOptions)
where
    L: AcceptListener + 'static,
{
    let AcceptLoopOptions { shutdown, backoff } = options;
    let backoff = backoff.normalized();
    debug_assert!(
        backoff.initial_delay <= backoff.max_delay,
        "BackoffConfig invariant violated: initial_delay > max_delay"
    );
    debug_assert!(
        backoff.initial_delay >= Duration::from_millis(1),
        "BackoffConfig invariant violated: initial_delay < 1ms"
    );
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) = accept_iteration(&listener, &target, &shutdown, &backoff, delay).await {
        delay = next_delay;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<L>(
    listener: &Arc<L>,
    target: &AcceptTarget,
    shutdown: &CancellationToken,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener + 'static,
{
    select! {
        biased;

        () = shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, addr)) => {
                hand_off(target, stream, addr);
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                tracing::warn!(error = ?e, ?local_addr, "accept error");
                sleep(delay).await;
                backoff.next_delay(delay)
            }
        }),
    }
}

fn hand_off(target: &AcceptTarget, stream: TcpStream, addr: SocketAddr) {
    match target.pool.bind_tcp(stream, target.handlers.clone()) {
        Ok(session) => debug!("connection accepted: session={}, remote={addr}", session.id()),
        Err(e) => target.handlers.hooks.report(&ExceptionEvent {
            session: None,
            remote: Some(addr),
            source: ExceptionSource::Accept,
            message: format!("failed to bind accepted connection: {e}"),
        }),
    }
}
