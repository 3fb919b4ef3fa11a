//! Receive-pipeline stages.
//!
//! A [`MiddlewareChain`] is an ordered list of [`Middleware`] stages run over a
//! session's inbound [`ByteBuffer`] every time bytes arrive. A stage either
//! claims the bytes (parsing and removing complete messages) or hands the
//! untouched buffer to the rest of the chain through [`Next`]. Stages run
//! while the session holds its buffer lock, so they must not block; long
//! running work belongs on a spawned task.

use std::{error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

use crate::{
    byte_buffer::ByteBuffer,
    fast::FastError,
    http::HttpError,
    session::Session,
    websocket::WsError,
};

/// Failure of a receive stage. Returning one closes the session.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    /// More unparsed bytes accumulated than the session allows.
    #[error("inbound buffer exceeded {limit} bytes")]
    BufferLimit {
        /// Configured ceiling.
        limit: usize,
    },
    /// Malformed Fast packet stream.
    #[error(transparent)]
    Fast(#[from] FastError),
    /// Malformed WebSocket stream.
    #[error(transparent)]
    WebSocket(#[from] WsError),
    /// Malformed HTTP request.
    #[error(transparent)]
    Http(#[from] HttpError),
    /// Failure raised by an application-defined stage.
    #[error("middleware error: {0}")]
    Other(Box<dyn StdError + Send + Sync>),
}

/// One stage of the receive pipeline.
pub trait Middleware: Send + Sync + 'static {
    /// Called once per binding before any bytes are received.
    fn on_connect(&self, _session: &Arc<Session>) {}

    /// Inspect newly arrived bytes.
    ///
    /// Stages that do not recognise the stream pass it on with
    /// `next.run(session, buffer)`.
    ///
    /// # Errors
    ///
    /// Returning an error reports it and closes the session.
    fn on_received(
        &self,
        session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        next: Next<'_>,
    ) -> Result<(), MiddlewareError>;

    /// Called once per binding after the connection has ended.
    fn on_disconnect(&self, _session: &Arc<Session>) {}
}

/// Remaining stages after the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    const fn new(rest: &'a [Arc<dyn Middleware>]) -> Self { Self { rest } }

    /// Run the remaining stages. Reaching the end of the chain leaves the
    /// buffer untouched.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by a later stage.
    pub fn run(self, session: &Arc<Session>, buffer: &mut ByteBuffer) -> Result<(), MiddlewareError> {
        match self.rest.split_first() {
            Some((stage, rest)) => stage.on_received(session, buffer, Next::new(rest)),
            None => Ok(()),
        }
    }

    /// Returns `true` when no stages remain.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.rest.is_empty() }
}

/// Ordered receive pipeline shared by every session of a server.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use sockframe::{http::HttpMiddleware, middleware::MiddlewareChain};
///
/// let chain = MiddlewareChain::builder()
///     .push(HttpMiddleware::default())
///     .build();
/// assert_eq!(chain.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl MiddlewareChain {
    /// Start building a chain.
    #[must_use]
    pub fn builder() -> MiddlewareChainBuilder { MiddlewareChainBuilder::default() }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize { self.stages.len() }

    /// Returns `true` if the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }

    /// Run every stage over `buffer`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by a stage.
    pub fn run(&self, session: &Arc<Session>, buffer: &mut ByteBuffer) -> Result<(), MiddlewareError> {
        Next::new(&self.stages).run(session, buffer)
    }

    pub(crate) fn notify_connect(&self, session: &Arc<Session>) {
        for stage in &self.stages {
            stage.on_connect(session);
        }
    }

    pub(crate) fn notify_disconnect(&self, session: &Arc<Session>) {
        for stage in &self.stages {
            stage.on_disconnect(session);
        }
    }
}

/// Builder for [`MiddlewareChain`].
#[derive(Default)]
pub struct MiddlewareChainBuilder {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChainBuilder {
    /// Append `stage` after the stages added so far.
    #[must_use]
    pub fn push<M: Middleware>(self, stage: M) -> Self { self.push_shared(Arc::new(stage)) }

    /// Append an already shared stage.
    #[must_use]
    pub fn push_shared(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Finish the chain.
    #[must_use]
    pub fn build(self) -> MiddlewareChain { MiddlewareChain { stages: self.stages } }
}
