use std::{fmt, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
};

use super::{FastConfig, FastMiddleware, FastPeer, IntoParams, RpcError};
use crate::{
    middleware::MiddlewareChain,
    serializer::{BincodeSerializer, Serializer},
    session::{Session, SessionConfig, SessionError, SessionHandlers},
};

/// Outbound Fast connection.
///
/// # Examples
///
/// ```no_run
/// use sockframe::fast::{FastClient, FastConfig};
///
/// # async fn demo() -> Result<(), sockframe::fast::RpcError> {
/// let client = FastClient::connect("127.0.0.1:7000", FastConfig::default()).await?;
/// let reply: String = client.invoke_api(5, ("abcd".to_string(),)).await?;
/// assert_eq!(reply, "abcd!");
/// # Ok(())
/// # }
/// ```
pub struct FastClient<S = BincodeSerializer> {
    session: Arc<Session>,
    peer: Arc<FastPeer<S>>,
}

impl<S> fmt::Debug for FastClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastClient")
            .field("session", &self.session)
            .field("peer", &self.peer)
            .finish()
    }
}

impl FastClient<BincodeSerializer> {
    /// Connect to `addr` using [`BincodeSerializer`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connect`] if the TCP connection fails.
    pub async fn connect<A: ToSocketAddrs>(addr: A, config: FastConfig) -> Result<Self, RpcError> {
        Self::connect_with(
            addr,
            FastMiddleware::client(BincodeSerializer, config),
            SessionConfig::default(),
        )
        .await
    }
}

impl<S: Serializer> FastClient<S> {
    /// Connect to `addr` with a custom stage and session settings.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connect`] if the TCP connection fails.
    pub async fn connect_with<A: ToSocketAddrs>(
        addr: A,
        middleware: FastMiddleware<S>,
        session_config: SessionConfig,
    ) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await.map_err(RpcError::Connect)?;
        let session = Arc::new(Session::new(session_config));
        session.bind_tcp(stream, handlers(middleware))?;
        Self::attach(session)
    }

    /// Run the client over an existing duplex stream.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Session`] if binding fails.
    pub fn from_io<T>(
        io: T,
        remote: Option<SocketAddr>,
        middleware: FastMiddleware<S>,
        session_config: SessionConfig,
    ) -> Result<Self, RpcError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = Arc::new(Session::new(session_config));
        session.bind(io, remote, handlers(middleware))?;
        Self::attach(session)
    }

    fn attach(session: Arc<Session>) -> Result<Self, RpcError> {
        let peer = FastPeer::<S>::for_session(&session).ok_or(SessionError::NotConnected)?;
        Ok(Self { session, peer })
    }

    /// Call `command` with typed arguments.
    ///
    /// # Errors
    ///
    /// See [`FastPeer::invoke_api`].
    pub async fn invoke_api<A, R>(&self, command: i32, args: A) -> Result<R, RpcError>
    where
        A: IntoParams,
        R: DeserializeOwned,
    {
        self.peer.invoke_api(command, args).await
    }

    /// Call `command` with a raw body.
    ///
    /// # Errors
    ///
    /// See [`FastPeer::invoke_raw`].
    pub async fn invoke_raw(&self, command: i32, body: Bytes) -> Result<Bytes, RpcError> {
        self.peer.invoke_raw(command, body).await
    }

    /// Underlying session.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> { &self.session }

    /// Returns `true` while the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.session.is_connected() }

    /// Close the connection, failing outstanding calls.
    pub async fn close(&self) { self.session.close(false).await; }
}

fn handlers<S: Serializer>(middleware: FastMiddleware<S>) -> SessionHandlers {
    SessionHandlers::new(Arc::new(MiddlewareChain::builder().push(middleware).build()))
}
