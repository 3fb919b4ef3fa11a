//! Reusable connection sessions.
//!
//! A [`Session`] owns one live connection at a time. Binding a socket starts a
//! receive task that appends every read to the session's [`ByteBuffer`] and
//! runs the [`MiddlewareChain`](crate::middleware::MiddlewareChain) over it.
//! Outbound bytes are chunked into a FIFO drained by at most one writer task,
//! so frames from concurrent senders never interleave. When the connection
//! ends the session becomes [`SessionState::Unbound`] again and may be handed
//! back to a [`SessionPool`] for the next connection.

mod config;
mod error;
mod io;
mod pool;
mod tags;

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        RwLock,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
pub use config::{DEFAULT_IO_BUFFER_SIZE, DEFAULT_MAX_BUFFERED, SessionConfig};
pub use error::SessionError;
use io::Binding;
use log::debug;
pub use pool::{PoolStats, SessionFactory, SessionPool};
use socket2::{SockRef, TcpKeepalive};
pub use tags::{TagBag, TagValue};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{
    byte_buffer::ByteBuffer,
    extensions::Extensions,
    hooks::{ExceptionEvent, ExceptionSource, SessionCallback, SessionHooks},
    metrics,
    middleware::MiddlewareChain,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier assigned to each binding of a session.
///
/// A pooled session receives a fresh id every time it is bound, so ids never
/// refer to more than one connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }

    fn next() -> Self { Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)) }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Lifecycle state of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not attached to a connection; may be bound.
    Unbound,
    /// Attached to a live connection.
    Bound,
    /// Shutting the current connection down.
    Closing,
}

const UNBOUND: u8 = 0;
const BOUND: u8 = 1;
const CLOSING: u8 = 2;

impl SessionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            BOUND => Self::Bound,
            CLOSING => Self::Closing,
            _ => Self::Unbound,
        }
    }
}

/// Protocol a session has settled on, recorded by the middleware that claimed
/// its byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// No middleware has claimed the stream yet.
    Unknown,
    /// Plain HTTP requests.
    Http,
    /// Upgraded WebSocket connection.
    WebSocket,
    /// Length-prefixed Fast RPC packets.
    Fast,
}

impl Protocol {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Http => "http",
            Self::WebSocket => "websocket",
            Self::Fast => "fast",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Http,
            2 => Self::WebSocket,
            3 => Self::Fast,
            _ => Self::Unknown,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Http => 1,
            Self::WebSocket => 2,
            Self::Fast => 3,
        }
    }
}

/// Everything a binding needs to process its connection.
#[derive(Clone)]
pub struct SessionHandlers {
    pub(crate) chain: Arc<MiddlewareChain>,
    pub(crate) hooks: SessionHooks,
    pub(crate) on_release: Option<SessionCallback>,
}

impl fmt::Debug for SessionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandlers")
            .field("chain", &self.chain)
            .field("hooks", &self.hooks)
            .field("on_release", &self.on_release.is_some())
            .finish()
    }
}

impl SessionHandlers {
    /// Process received bytes with `chain`.
    #[must_use]
    pub fn new(chain: Arc<MiddlewareChain>) -> Self {
        Self {
            chain,
            hooks: SessionHooks::default(),
            on_release: None,
        }
    }

    /// Attach lifecycle and exception hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: SessionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run `f` last when a binding ends, once the session is
    /// [`SessionState::Unbound`] again. Pools use this to recycle sessions.
    #[must_use]
    pub fn on_release<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Session>) + Send + Sync + 'static,
    {
        self.on_release = Some(Arc::new(f));
        self
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A reusable connection endpoint.
pub struct Session {
    config: SessionConfig,
    state: AtomicU8,
    id: AtomicU64,
    protocol: AtomicU8,
    binding: RwLock<Option<Arc<Binding>>>,
    buffer: Mutex<ByteBuffer>,
    tags: TagBag,
    extensions: Mutex<Extensions>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("protocol", &self.protocol())
            .field("remote", &self.remote_addr())
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self { Self::new(SessionConfig::default()) }
}

impl Session {
    /// Create an unbound session.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let buffer = ByteBuffer::with_capacity(config.io_buffer_size)
            .with_endianness(config.endianness);
        Self {
            config,
            state: AtomicU8::new(UNBOUND),
            id: AtomicU64::new(0),
            protocol: AtomicU8::new(Protocol::Unknown.as_u8()),
            binding: RwLock::new(None),
            buffer: Mutex::new(buffer),
            tags: TagBag::default(),
            extensions: Mutex::new(Extensions::default()),
        }
    }

    /// Settings applied to each binding.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig { &self.config }

    /// Id of the current or most recent binding. Zero before the first bind.
    #[must_use]
    pub fn id(&self) -> SessionId { SessionId(self.id.load(Ordering::Acquire)) }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState { SessionState::from_u8(self.state.load(Ordering::Acquire)) }

    /// Returns `true` while bound and not closing.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.state() == SessionState::Bound }

    /// Remote address of the current binding.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.current_binding().and_then(|binding| binding.remote)
    }

    /// User data scoped to the current binding.
    #[must_use]
    pub const fn tags(&self) -> &TagBag { &self.tags }

    /// Protocol claimed by the middleware chain for this binding.
    #[must_use]
    pub fn protocol(&self) -> Protocol { Protocol::from_u8(self.protocol.load(Ordering::Acquire)) }

    /// Record the protocol this binding speaks.
    pub fn set_protocol(&self, protocol: Protocol) {
        self.protocol.store(protocol.as_u8(), Ordering::Release);
    }

    /// Per-binding protocol state of type `T`.
    #[must_use]
    pub fn extension<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        lock(&self.extensions).get::<T>()
    }

    /// Attach per-binding protocol state, replacing any existing `T`.
    pub fn insert_extension<T>(&self, value: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        lock(&self.extensions).insert(value);
    }

    /// Fetch or lazily create per-binding protocol state.
    pub fn extension_or_insert_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Arc<T>,
    {
        lock(&self.extensions).get_or_insert_with(init)
    }

    /// Number of queued outbound chunks not yet written.
    #[must_use]
    pub fn pending_sends(&self) -> usize {
        self.current_binding()
            .map_or(0, |binding| binding.pending())
    }

    /// Bind a TCP connection, applying keep-alive and no-delay settings first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyBound`] if the session is not
    /// [`SessionState::Unbound`].
    pub fn bind_tcp(
        self: &Arc<Self>,
        stream: TcpStream,
        handlers: SessionHandlers,
    ) -> Result<SessionId, SessionError> {
        configure_socket(&stream, &self.config);
        let remote = match stream.peer_addr() {
            Ok(addr) => Some(addr),
            Err(e) => {
                debug!("failed to read peer address: error={e}");
                None
            }
        };
        self.bind(stream, remote, handlers)
    }

    /// Bind any duplex byte stream and start receiving.
    ///
    /// Resets the buffer, tags and protocol state, runs every middleware's
    /// connect hook and the `on_connected` hook, then spawns the receive task.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyBound`] if the session is not
    /// [`SessionState::Unbound`].
    pub fn bind<T>(
        self: &Arc<Self>,
        io: T,
        remote: Option<SocketAddr>,
        handlers: SessionHandlers,
    ) -> Result<SessionId, SessionError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.state
            .compare_exchange(UNBOUND, BOUND, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::AlreadyBound)?;
        self.reset();

        let id = SessionId::next();
        self.id.store(id.as_u64(), Ordering::Release);
        let (reader, writer) = tokio::io::split(io);
        let binding = Arc::new(Binding::new(id, remote, Box::new(writer), handlers));
        *self
            .binding
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&binding));
        metrics::inc_sessions();
        debug!("session bound: session={id}, remote={remote:?}");

        self.notify_connect(&binding);
        tokio::spawn(Arc::clone(self).receive_loop(binding, Box::new(reader)));
        Ok(id)
    }

    /// Queue `data` for transmission.
    ///
    /// Data is split into chunks of at most `io_buffer_size` bytes and queued
    /// contiguously, so concurrent senders never interleave their payloads.
    /// Empty input is accepted and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the session is bound and
    /// not closing.
    pub fn send(self: &Arc<Self>, data: &[u8]) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let binding = self.current_binding().ok_or(SessionError::NotConnected)?;
        if data.is_empty() {
            return Ok(());
        }
        let chunks = data
            .chunks(self.config.io_buffer_size.max(1))
            .map(Bytes::copy_from_slice);
        if binding.enqueue(chunks) {
            tokio::spawn(Arc::clone(self).drain(binding));
        }
        Ok(())
    }

    /// Close the current connection.
    ///
    /// With `wait_for_pending`, queued sends are given up to
    /// [`SessionConfig::drain_timeout`] to reach the socket; otherwise they are
    /// discarded. Returns `true` if this call initiated the close, `false` if
    /// the session was already closing or unbound.
    pub async fn close(self: &Arc<Self>, wait_for_pending: bool) -> bool {
        if self
            .state
            .compare_exchange(BOUND, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let Some(binding) = self.current_binding() else { return false };
        if wait_for_pending
            && tokio::time::timeout(self.config.drain_timeout, binding.wait_drained())
                .await
                .is_err()
        {
            log::warn!(
                "send queue did not drain before close: session={}, pending={}",
                binding.id,
                binding.pending()
            );
        }
        self.finalize(&binding).await;
        true
    }

    /// Start [`close`](Self::close) on a background task.
    ///
    /// Suitable for synchronous contexts such as middleware.
    pub fn begin_close(self: &Arc<Self>, wait_for_pending: bool) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.close(wait_for_pending).await;
        });
    }

    /// Report a failure through this binding's exception hook.
    pub fn report_exception(&self, source: ExceptionSource, message: impl Into<String>) {
        let event = ExceptionEvent {
            session: Some(self.id()),
            remote: self.remote_addr(),
            source,
            message: message.into(),
        };
        match self.current_binding() {
            Some(binding) => binding.handlers.hooks.report(&event),
            None => SessionHooks::default().report(&event),
        }
    }

    /// Clear per-binding state ahead of reuse.
    pub(crate) fn reset(&self) {
        lock(&self.buffer).clear();
        self.tags.clear();
        lock(&self.extensions).clear();
        self.set_protocol(Protocol::Unknown);
    }

    fn current_binding(&self) -> Option<Arc<Binding>> {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn configure_socket(stream: &TcpStream, config: &SessionConfig) {
    if config.nodelay
        && let Err(e) = stream.set_nodelay(true)
    {
        debug!("failed to set TCP_NODELAY: error={e}");
    }
    let Some(idle) = config.keepalive else { return };
    let socket = SockRef::from(stream);
    if let Err(e) = socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle)) {
        debug!("tuned keep-alive unavailable, falling back to SO_KEEPALIVE: error={e}");
        if let Err(e) = socket.set_keepalive(true) {
            debug!("failed to enable keep-alive: error={e}");
        }
    }
}

#[cfg(test)]
mod tests;
