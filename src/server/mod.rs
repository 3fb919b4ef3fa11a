//! Tokio-based TCP server feeding pooled sessions.
//!
//! [`SocketServer`] spawns worker tasks that accept TCP connections from a
//! shared listener. Each connection is bound to a [`Session`] taken from the
//! server's [`SessionPool`] and processed by the configured
//! [`MiddlewareChain`]; when the connection ends the session returns to the
//! pool for the next one.
//!
//! [`Session`]: crate::session::Session

use std::sync::Arc;

use tokio::{net::TcpListener, sync::oneshot};

use crate::{hooks::SessionHooks, middleware::MiddlewareChain, session::SessionPool};

/// TCP server binding accepted connections to pooled sessions.
///
/// The server carries a typestate `S` recording whether it is [`Unbound`] or
/// [`Bound`]. New servers start `Unbound` and must call
/// [`bind`](SocketServer::bind) or
/// [`bind_existing_listener`](SocketServer::bind_existing_listener) before
/// they can run.
pub struct SocketServer<S = Unbound>
where
    S: ServerState,
{
    pub(crate) chain: Arc<MiddlewareChain>,
    pub(crate) hooks: SessionHooks,
    pub(crate) pool: Arc<SessionPool>,
    pub(crate) workers: usize,
    pub(crate) backoff_config: BackoffConfig,
    /// Fires once every accept worker has been spawned. Single use: supply a
    /// fresh sender for each run.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

mod config;
pub mod error;
mod runtime;

pub use error::ServerError;
pub use runtime::BackoffConfig;

#[cfg(test)]
pub(crate) mod test_util;
