//! Builder configuration for [`SocketServer`].

use std::sync::Arc;

use tokio::sync::oneshot;

use super::{BackoffConfig, ServerState, SocketServer, Unbound};
use crate::{
    config::ServerConfig,
    hooks::SessionHooks,
    middleware::MiddlewareChain,
    session::{SessionConfig, SessionFactory, SessionPool},
};

mod binding;

impl SocketServer<Unbound> {
    /// Create a server whose sessions all run `chain`.
    ///
    /// The worker count defaults to the number of available CPU cores (or 1 if
    /// this cannot be determined). Call [`bind`](Self::bind) before running.
    ///
    /// # Examples
    ///
    /// ```
    /// use sockframe::{http::HttpMiddleware, middleware::MiddlewareChain, server::SocketServer};
    ///
    /// let chain = MiddlewareChain::builder().push(HttpMiddleware::default()).build();
    /// let server = SocketServer::new(chain).workers(2);
    /// assert_eq!(server.worker_count(), 2);
    /// ```
    #[must_use]
    pub fn new(chain: MiddlewareChain) -> Self {
        let workers = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            chain: Arc::new(chain),
            hooks: SessionHooks::default(),
            pool: Arc::new(SessionPool::new(SessionConfig::default())),
            workers,
            backoff_config: BackoffConfig::default(),
            ready_tx: None,
            state: Unbound,
        }
    }

    /// Create a server tuned by `config`.
    #[must_use]
    pub fn from_config(chain: MiddlewareChain, config: &ServerConfig) -> Self {
        Self::new(chain)
            .workers(config.workers)
            .accept_backoff(config.backoff)
            .session_config(config.session.clone())
    }
}

impl<S> SocketServer<S>
where
    S: ServerState,
{
    /// Set the number of accept tasks. Zero is raised to one.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Configure accept error back-off. Values are normalised when the
    /// server starts.
    #[must_use]
    pub fn accept_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff_config = config;
        self
    }

    /// Build pooled sessions with `config`. Replaces the pool.
    #[must_use]
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.pool = Arc::new(SessionPool::new(config));
        self
    }

    /// Build pooled sessions with `factory`. Replaces the pool.
    #[must_use]
    pub fn session_factory(mut self, factory: SessionFactory) -> Self {
        self.pool = Arc::new(SessionPool::with_factory(factory));
        self
    }

    /// Lifecycle and exception hooks applied to every session.
    #[must_use]
    pub fn hooks(mut self, hooks: SessionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Configure a channel used to signal when the server is ready to accept
    /// connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Returns the configured number of worker tasks for the server.
    #[inline]
    #[must_use]
    pub const fn worker_count(&self) -> usize { self.workers }

    /// Returns the accept back-off configuration.
    #[must_use]
    pub const fn backoff_config(&self) -> BackoffConfig { self.backoff_config }

    /// Pool holding this server's sessions.
    #[must_use]
    pub const fn pool(&self) -> &Arc<SessionPool> { &self.pool }
}
