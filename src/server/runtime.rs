//! Runtime control for [`SocketServer`].

mod accept;
mod backoff;

use std::sync::Arc;

#[cfg(test)]
pub(super) use accept::MockAcceptListener;
pub(super) use accept::{AcceptLoopOptions, AcceptTarget, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{Bound, ServerError, SocketServer};
use crate::session::SessionHandlers;

impl SocketServer<Bound> {
    /// Run the server until Ctrl+C is received.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sockframe::{http::HttpMiddleware, middleware::MiddlewareChain, server::SocketServer};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), sockframe::server::ServerError> {
    /// let chain = MiddlewareChain::builder().push(HttpMiddleware::default()).build();
    /// let server = SocketServer::new(chain).bind(([127, 0, 0, 1], 8080).into())?;
    /// server.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// Attempting to run a server without binding fails to compile:
    ///
    /// ```compile_fail
    /// use sockframe::{middleware::MiddlewareChain, server::SocketServer};
    ///
    /// async fn try_run() {
    ///     SocketServer::new(MiddlewareChain::default())
    ///         .run()
    ///         .await
    ///         .expect("unbound servers do not expose run()");
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors; the `Result` is reserved for startup failures.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until the `shutdown` future resolves.
    ///
    /// On shutdown the accept workers stop, every active session is closed
    /// after its queued sends drain, and no session is recycled afterwards.
    ///
    /// # Examples
    ///
    /// ```
    /// use sockframe::{middleware::MiddlewareChain, server::SocketServer};
    /// use tokio::sync::oneshot;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), sockframe::server::ServerError> {
    /// let server = SocketServer::new(MiddlewareChain::default()).bind(([127, 0, 0, 1], 0).into())?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(async move {
    ///     server
    ///         .run_with_shutdown(async {
    ///             let _ = rx.await;
    ///         })
    ///         .await
    /// });
    ///
    /// let _ = tx.send(());
    /// handle
    ///     .await
    ///     .expect("join server task")
    ///     .expect("server run failed");
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let SocketServer {
            chain,
            hooks,
            pool,
            workers,
            backoff_config,
            ready_tx,
            state: Bound { listener },
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let target = AcceptTarget {
            pool: Arc::clone(&pool),
            handlers: SessionHandlers::new(chain).with_hooks(hooks),
        };

        for _ in 0..workers {
            tracker.spawn(accept_loop(
                Arc::clone(&listener),
                target.clone(),
                AcceptLoopOptions {
                    shutdown: shutdown_token.clone(),
                    backoff: backoff_config,
                },
            ));
        }
        info!(
            "server listening: addr={:?}, workers={workers}",
            listener.local_addr().ok()
        );

        // Signal readiness after all workers have been spawned.
        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        pool.shutdown().await;
        info!("server stopped: stats={:?}", pool.stats());
        Ok(())
    }
}
