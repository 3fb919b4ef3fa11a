//! Recycling of idle sessions across connections.

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::net::TcpStream;

use super::{Session, SessionConfig, SessionError, SessionHandlers, SessionId, SessionState, lock};

/// Produces fresh sessions when the free list is empty.
pub type SessionFactory = Arc<dyn Fn() -> Result<Session, SessionError> + Send + Sync>;

/// Snapshot of pool counters.
///
/// Outside shutdown, `created == free + active`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions produced by the factory and still owned by the pool.
    pub created: u64,
    /// Idle sessions ready for reuse.
    pub free: usize,
    /// Sessions bound to a live connection.
    pub active: usize,
    /// Connections that could not be handed a session.
    pub accept_failures: u64,
}

/// Free list of unbound sessions plus a registry of bound ones.
///
/// # Examples
///
/// ```
/// use sockframe::session::{SessionConfig, SessionPool};
///
/// let pool = SessionPool::new(SessionConfig::default());
/// let session = pool.take_or_create().expect("factory succeeds");
/// assert!(!session.is_connected());
/// assert_eq!(pool.stats().created, 1);
/// ```
pub struct SessionPool {
    free: Mutex<Vec<Arc<Session>>>,
    active: DashMap<SessionId, Arc<Session>>,
    factory: SessionFactory,
    created: AtomicU64,
    accept_failures: AtomicU64,
    shutting_down: AtomicBool,
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Create a pool whose sessions all use `config`.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_factory(Arc::new(move || Ok(Session::new(config.clone()))))
    }

    /// Create a pool backed by a custom session factory.
    #[must_use]
    pub fn with_factory(factory: SessionFactory) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            active: DashMap::new(),
            factory,
            created: AtomicU64::new(0),
            accept_failures: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Pop an idle session, if any.
    #[must_use]
    pub fn take(&self) -> Option<Arc<Session>> { lock(&self.free).pop() }

    /// Pop an idle session or build a new one.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error and counts it as an accept failure.
    pub fn take_or_create(&self) -> Result<Arc<Session>, SessionError> {
        if let Some(session) = self.take() {
            return Ok(session);
        }
        match (self.factory)() {
            Ok(session) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::new(session))
            }
            Err(e) => {
                self.record_accept_failure();
                Err(e)
            }
        }
    }

    /// Bind `stream` to a pooled session that returns to this pool when the
    /// connection ends.
    ///
    /// # Errors
    ///
    /// Fails if no session can be produced or binding fails; both count as
    /// accept failures.
    pub fn bind_tcp(
        self: &Arc<Self>,
        stream: TcpStream,
        handlers: SessionHandlers,
    ) -> Result<Arc<Session>, SessionError> {
        let session = self.take_or_create()?;
        let pool = Arc::downgrade(self);
        let handlers = handlers.on_release(move |session| {
            if let Some(pool) = pool.upgrade() {
                pool.recycle(session);
            }
        });
        if let Err(e) = session.bind_tcp(stream, handlers) {
            self.record_accept_failure();
            if session.state() == SessionState::Unbound {
                lock(&self.free).push(session);
            }
            return Err(e);
        }
        self.activate(&session);
        // The connection may already have ended before it was registered.
        if session.state() == SessionState::Unbound {
            self.recycle(&session);
        }
        Ok(session)
    }

    /// Register a freshly bound session as active.
    pub fn activate(&self, session: &Arc<Session>) {
        self.active.insert(session.id(), Arc::clone(session));
    }

    /// Return `session` to the free list after its connection ended.
    ///
    /// Sessions that are not registered as active, or that are still bound,
    /// are ignored so a session can never be pooled twice. Returns `true` if
    /// the session was recycled. During shutdown sessions are retired instead.
    pub fn recycle(&self, session: &Arc<Session>) -> bool {
        if session.state() != SessionState::Unbound {
            return false;
        }
        let removed = self
            .active
            .remove_if(&session.id(), |_, active| Arc::ptr_eq(active, session));
        if removed.is_none() {
            return false;
        }
        if self.shutting_down.load(Ordering::Acquire) {
            self.created.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        session.reset();
        lock(&self.free).push(Arc::clone(session));
        true
    }

    /// Count a connection that could not be bound to a session.
    pub fn record_accept_failure(&self) { self.accept_failures.fetch_add(1, Ordering::Relaxed); }

    /// Sessions currently bound to a live connection.
    #[must_use]
    pub fn active(&self) -> Vec<Arc<Session>> {
        self.active.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Look up an active session by id.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.active.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            free: lock(&self.free).len(),
            active: self.active.len(),
            accept_failures: self.accept_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop recycling and close every active session, waiting for queued
    /// sends up to each session's drain timeout.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let sessions = self.active();
        join_all(sessions.iter().map(|session| session.close(true))).await;
    }
}
