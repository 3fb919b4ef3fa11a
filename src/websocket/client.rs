use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::oneshot,
};

use super::{
    ClientHandshake,
    HandshakeError,
    WebSocketConfig,
    WebSocketHandler,
    WebSocketPeer,
    WsError,
    peer::Role,
};
use crate::{
    byte_buffer::ByteBuffer,
    http::HttpResponseHead,
    middleware::{Middleware, MiddlewareChain, MiddlewareError, Next},
    session::{Protocol, Session, SessionConfig, SessionHandlers, lock},
};

type HandshakeResult = Result<Arc<WebSocketPeer>, HandshakeError>;

/// Dialled WebSocket connection.
///
/// # Examples
///
/// ```no_run
/// use sockframe::websocket::{EchoHandler, WebSocketClient, WebSocketConfig};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let client =
///     WebSocketClient::connect("127.0.0.1:9000", "/", EchoHandler, WebSocketConfig::default())
///         .await?;
/// client.send_text("hello")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WebSocketClient {
    session: Arc<Session>,
    peer: Arc<WebSocketPeer>,
}

impl WebSocketClient {
    /// Connect to `addr` and upgrade `path`.
    ///
    /// Connecting and the upgrade exchange are each bounded by
    /// [`handshake_timeout`](WebSocketConfig::handshake_timeout).
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] on connect failure, timeout, or a
    /// rejected upgrade. The connection is closed on failure.
    pub async fn connect<H: WebSocketHandler>(
        addr: &str,
        path: &str,
        handler: H,
        config: WebSocketConfig,
    ) -> Result<Self, HandshakeError> {
        let stream = tokio::time::timeout(config.handshake_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| HandshakeError::Timeout)?
            .map_err(HandshakeError::Connect)?;
        let limit = config.handshake_timeout;
        let (handlers, result) = handshake_chain(addr, path, Arc::new(handler), config);
        let session = Arc::new(Session::new(SessionConfig::default()));
        session.bind_tcp(stream, handlers)?;
        Self::await_upgrade(session, result, limit).await
    }

    /// Upgrade over an already connected stream such as an in-memory duplex.
    ///
    /// # Errors
    ///
    /// As for [`connect`](Self::connect), minus connect failures.
    pub async fn from_io<T, H>(
        io: T,
        host: &str,
        path: &str,
        handler: H,
        config: WebSocketConfig,
    ) -> Result<Self, HandshakeError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        H: WebSocketHandler,
    {
        let limit = config.handshake_timeout;
        let (handlers, result) = handshake_chain(host, path, Arc::new(handler), config);
        let session = Arc::new(Session::new(SessionConfig::default()));
        session.bind(io, None, handlers)?;
        Self::await_upgrade(session, result, limit).await
    }

    async fn await_upgrade(
        session: Arc<Session>,
        result: oneshot::Receiver<HandshakeResult>,
        limit: Duration,
    ) -> Result<Self, HandshakeError> {
        let outcome = match tokio::time::timeout(limit, result).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(HandshakeError::Closed),
            Err(_) => Err(HandshakeError::Timeout),
        };
        match outcome {
            Ok(peer) => Ok(Self { session, peer }),
            Err(e) => {
                session.close(false).await;
                Err(e)
            }
        }
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// See [`WebSocketPeer::send_text`].
    pub fn send_text(&self, text: &str) -> Result<(), WsError> { self.peer.send_text(text) }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// See [`WebSocketPeer::send_binary`].
    pub fn send_binary(&self, data: &[u8]) -> Result<(), WsError> { self.peer.send_binary(data) }

    /// Round-trip a ping; `false` on timeout.
    pub async fn ping(&self, timeout: Duration) -> bool { self.peer.ping_async(timeout).await }

    /// Start the closing handshake.
    ///
    /// # Errors
    ///
    /// See [`WebSocketPeer::close`].
    pub fn close(&self, code: u16, reason: &str) -> Result<(), WsError> { self.peer.close(code, reason) }

    /// The connection's peer.
    #[must_use]
    pub const fn peer(&self) -> &Arc<WebSocketPeer> { &self.peer }

    /// Session carrying the connection.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> { &self.session }

    /// See [`WebSocketPeer::is_open`].
    #[must_use]
    pub fn is_open(&self) -> bool { self.peer.is_open() }
}

fn handshake_chain(
    host: &str,
    path: &str,
    handler: Arc<dyn WebSocketHandler>,
    config: WebSocketConfig,
) -> (SessionHandlers, oneshot::Receiver<HandshakeResult>) {
    let (tx, rx) = oneshot::channel();
    let stage = ClientStage {
        handshake: ClientHandshake::new(host, path),
        handler,
        config,
        result: Mutex::new(Some(tx)),
    };
    let chain = MiddlewareChain::builder().push(stage).build();
    (SessionHandlers::new(Arc::new(chain)), rx)
}

/// Sends the upgrade request on connect, waits for the `101`, then hands
/// the stream to a client-role peer.
struct ClientStage {
    handshake: ClientHandshake,
    handler: Arc<dyn WebSocketHandler>,
    config: WebSocketConfig,
    result: Mutex<Option<oneshot::Sender<HandshakeResult>>>,
}

impl fmt::Debug for ClientStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStage")
            .field("handshake", &self.handshake)
            .finish_non_exhaustive()
    }
}

impl ClientStage {
    fn finish(&self, outcome: HandshakeResult) {
        if let Some(tx) = lock(&self.result).take() {
            // The caller may have timed out already.
            let _ = tx.send(outcome);
        }
    }
}

impl Middleware for ClientStage {
    fn on_connect(&self, session: &Arc<Session>) {
        if let Err(e) = session.send(&self.handshake.request_bytes()) {
            self.finish(Err(e.into()));
        }
    }

    fn on_received(
        &self,
        session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        _next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        if session.protocol() == Protocol::WebSocket {
            if let Some(peer) = WebSocketPeer::for_session(session) {
                peer.consume(session, buffer);
            }
            return Ok(());
        }
        let (head, used) = match HttpResponseHead::parse(buffer.as_slice()) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.finish(Err(e.clone().into()));
                return Err(e.into());
            }
        };
        if let Err(e) = self.handshake.verify(&head) {
            let message = e.to_string();
            self.finish(Err(e));
            return Err(MiddlewareError::Other(message.into()));
        }
        buffer
            .remove(used)
            .map_err(|e| MiddlewareError::Other(Box::new(e)))?;
        let peer = WebSocketPeer::start(
            session,
            Role::Client,
            Arc::clone(&self.handler),
            self.config.clone(),
        );
        self.finish(Ok(Arc::clone(&peer)));
        peer.consume(session, buffer);
        Ok(())
    }

    fn on_disconnect(&self, session: &Arc<Session>) {
        self.finish(Err(HandshakeError::Closed));
        if let Some(peer) = WebSocketPeer::for_session(session) {
            peer.on_disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::{io::duplex, sync::mpsc};

    use super::*;
    use crate::websocket::{EchoHandler, WebSocketMiddleware, close};

    struct Inbox(mpsc::UnboundedSender<(String, Option<u16>)>);

    #[async_trait]
    impl WebSocketHandler for Inbox {
        async fn on_text(&self, _peer: &Arc<WebSocketPeer>, text: String) {
            let _ = self.0.send((text, None));
        }

        async fn on_close(&self, _peer: &Arc<WebSocketPeer>, code: u16, reason: String) {
            let _ = self.0.send((reason, Some(code)));
        }

        async fn on_binary(&self, _peer: &Arc<WebSocketPeer>, _data: Bytes) {}
    }

    fn echo_server() -> tokio::io::DuplexStream {
        let (server_io, client_io) = duplex(64 * 1024);
        let chain = MiddlewareChain::builder()
            .push(WebSocketMiddleware::new(EchoHandler, WebSocketConfig::default()))
            .build();
        Arc::new(Session::default())
            .bind(server_io, None, SessionHandlers::new(Arc::new(chain)))
            .expect("binds");
        client_io
    }

    #[tokio::test]
    async fn client_talks_to_echo_server() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = WebSocketClient::from_io(
            echo_server(),
            "localhost",
            "/",
            Inbox(tx),
            WebSocketConfig::default(),
        )
        .await
        .expect("handshake succeeds");

        client.send_text("marco").expect("sends");
        assert_eq!(rx.recv().await, Some(("marco".to_owned(), None)));
        assert!(client.ping(Duration::from_secs(5)).await);
        assert_eq!(client.peer().pending_pings(), 0);

        client.close(close::NORMAL, "done").expect("close sent");
        assert!(matches!(client.send_text("late"), Err(WsError::Closed)));
        let (_, code) = rx.recv().await.expect("close reported");
        assert_eq!(code, Some(close::NORMAL));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let (_server_io, client_io) = duplex(1024);
        let config = WebSocketConfig {
            handshake_timeout: Duration::from_millis(100),
            ..WebSocketConfig::default()
        };
        let err = WebSocketClient::from_io(client_io, "localhost", "/", EchoHandler, config)
            .await
            .expect_err("no reply");
        assert!(matches!(err, HandshakeError::Timeout));
    }

    #[tokio::test]
    async fn non_upgrade_reply_is_rejected() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut server_io, client_io) = duplex(1024);
        tokio::spawn(async move {
            let mut request = [0u8; 512];
            let _ = server_io.read(&mut request).await;
            let _ = server_io
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await;
            let mut rest = Vec::new();
            let _ = server_io.read_to_end(&mut rest).await;
        });
        let err = WebSocketClient::from_io(
            client_io,
            "localhost",
            "/",
            EchoHandler,
            WebSocketConfig::default(),
        )
        .await
        .expect_err("rejected");
        assert!(matches!(err, HandshakeError::UnexpectedStatus(404)));
    }
}
