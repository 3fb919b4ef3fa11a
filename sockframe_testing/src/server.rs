//! Running a real server on an ephemeral port.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use sockframe::{MiddlewareChain, ServerError, SessionPool, SocketServer};
use tokio::{net::TcpStream, sync::oneshot, task::JoinHandle};

use crate::wire::Wire;

/// Create a TCP listener bound to a free local port.
///
/// # Errors
///
/// Returns any IO error encountered while binding to an ephemeral localhost
/// port.
///
/// # Examples
///
/// ```rust,no_run
/// use sockframe_testing::{TestResult, unused_listener};
///
/// fn example() -> TestResult {
///     let listener = unused_listener()?;
///     let addr = listener.local_addr()?;
///     assert!(addr.port() > 0);
///     Ok(())
/// }
/// ```
pub fn unused_listener() -> io::Result<StdTcpListener> {
    StdTcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
}

/// A [`SocketServer`] running on a background task.
pub struct TestServer {
    addr: SocketAddr,
    pool: Arc<SessionPool>,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Serve `chain` with two accept workers.
    ///
    /// # Errors
    ///
    /// See [`spawn_with`](Self::spawn_with).
    pub async fn spawn(chain: MiddlewareChain) -> io::Result<Self> {
        Self::spawn_with(SocketServer::new(chain).workers(2)).await
    }

    /// Bind `server` to an ephemeral port and run it until
    /// [`shutdown`](Self::shutdown). Returns once the server is accepting.
    ///
    /// # Errors
    ///
    /// Fails if no port can be bound or the server exits before it is ready.
    pub async fn spawn_with(server: SocketServer) -> io::Result<Self> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = server
            .ready_signal(ready_tx)
            .bind_existing_listener(unused_listener()?)
            .map_err(io::Error::other)?;
        let addr = server
            .local_addr()
            .ok_or_else(|| io::Error::other("listener has no local address"))?;
        let pool = Arc::clone(server.pool());
        let handle = tokio::spawn(server.run_with_shutdown(async {
            let _ = stop_rx.await;
        }));
        ready_rx
            .await
            .map_err(|_| io::Error::other("server exited before becoming ready"))?;
        Ok(Self {
            addr,
            pool,
            stop: Some(stop_tx),
            handle,
        })
    }

    /// Address the server listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr { self.addr }

    /// The server's session pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<SessionPool> { &self.pool }

    /// Open a client connection.
    ///
    /// # Errors
    ///
    /// Propagates connection failures.
    pub async fn connect(&self) -> io::Result<Wire<TcpStream>> {
        TcpStream::connect(self.addr).await.map(Wire::new)
    }

    /// Signal shutdown and wait for the server to stop.
    ///
    /// # Errors
    ///
    /// Fails if the server task panicked or returned an error.
    pub async fn shutdown(mut self) -> io::Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.handle)
            .await
            .map_err(io::Error::other)?
            .map_err(io::Error::other)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.handle.abort();
        }
    }
}
