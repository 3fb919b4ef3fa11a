//! Client-side view of a connection under test.

use std::{io, sync::Arc, time::Duration};

use sockframe::{
    ByteBuffer,
    MiddlewareChain,
    Session,
    SessionConfig,
    SessionError,
    fast::{DEFAULT_MAX_PACKET_LEN, FastPacket},
    http::HttpResponseHead,
    session::SessionHandlers,
    websocket::Frame,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, duplex},
    time::timeout,
};

/// Upper bound on any single read performed by [`Wire`].
pub const IO_TIMEOUT: Duration = Duration::from_secs(2);

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Byte stream plus a buffer of received bytes not yet decoded.
pub struct Wire<T> {
    io: T,
    inbound: ByteBuffer,
}

impl<T> Wire<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `io`.
    pub fn new(io: T) -> Self {
        Self {
            io,
            inbound: ByteBuffer::new(),
        }
    }

    /// Write all of `bytes` and flush.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the stream.
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.io.write_all(bytes).await?;
        self.io.flush().await
    }

    /// Close the write half so the server sees end of stream.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the stream.
    pub async fn shutdown(&mut self) -> io::Result<()> { self.io.shutdown().await }

    /// Read until `parse` yields a value.
    ///
    /// `parse` sees every byte received so far and must remove what it
    /// consumes.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] if a read stalls for
    /// [`IO_TIMEOUT`], [`io::ErrorKind::UnexpectedEof`] if the stream ends
    /// first, and [`io::ErrorKind::InvalidData`] if `parse` fails.
    pub async fn read_with<V, E, F>(&mut self, mut parse: F) -> io::Result<V>
    where
        F: FnMut(&mut ByteBuffer) -> Result<Option<V>, E>,
        E: std::fmt::Display,
    {
        let mut chunk = [0u8; 4096];
        loop {
            match parse(&mut self.inbound) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
            }
            let n = self.read_chunk(&mut chunk).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            self.inbound.add(&chunk[..n]);
        }
    }

    /// Read exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// See [`read_with`](Self::read_with).
    pub async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        self.read_with(|buf: &mut ByteBuffer| -> io::Result<Option<Vec<u8>>> {
            if buf.len() < len {
                return Ok(None);
            }
            let bytes = buf.to_array_range(0, len).map_err(io::Error::other)?;
            buf.remove(len).map_err(io::Error::other)?;
            Ok(Some(bytes))
        })
        .await
    }

    /// Read one Fast packet.
    ///
    /// # Errors
    ///
    /// See [`read_with`](Self::read_with).
    pub async fn read_fast_packet(&mut self) -> io::Result<FastPacket> {
        self.read_with(|buf| FastPacket::parse(buf, DEFAULT_MAX_PACKET_LEN))
            .await
    }

    /// Read one unmasked WebSocket frame as sent by a server.
    ///
    /// # Errors
    ///
    /// See [`read_with`](Self::read_with).
    pub async fn read_ws_frame(&mut self) -> io::Result<Frame> {
        self.read_with(|buf| Frame::parse(buf, false)).await
    }

    /// Read an HTTP response head, leaving any body buffered.
    ///
    /// # Errors
    ///
    /// See [`read_with`](Self::read_with).
    pub async fn read_http_head(&mut self) -> io::Result<HttpResponseHead> {
        self.read_with(|buf: &mut ByteBuffer| -> io::Result<Option<HttpResponseHead>> {
            let Some((head, used)) = HttpResponseHead::parse(buf.as_slice()).map_err(io::Error::other)? else {
                return Ok(None);
            };
            buf.remove(used).map_err(io::Error::other)?;
            Ok(Some(head))
        })
        .await
    }

    /// Wait for the peer to close, returning any bytes received meanwhile.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] if the stream stays open.
    pub async fn read_to_close(&mut self) -> io::Result<Vec<u8>> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.read_chunk(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => self.inbound.add(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => break,
                Err(e) => return Err(e),
            }
        }
        let rest = self.inbound.to_array();
        self.inbound.clear();
        Ok(rest)
    }

    async fn read_chunk(&mut self, chunk: &mut [u8]) -> io::Result<usize> {
        timeout(IO_TIMEOUT, self.io.read(chunk))
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))?
    }
}

/// A session bound to one end of an in-memory duplex stream.
pub struct SessionPair {
    /// Session under test.
    pub session: Arc<Session>,
    /// Client end of the stream.
    pub wire: Wire<DuplexStream>,
}

impl SessionPair {
    /// Bind a default-configured session running `chain`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::bind`] failures.
    pub fn bind(chain: MiddlewareChain) -> Result<Self, SessionError> {
        Self::bind_with(SessionHandlers::new(Arc::new(chain)), SessionConfig::default())
    }

    /// Bind a session built from `config` using `handlers`.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::bind`] failures.
    pub fn bind_with(handlers: SessionHandlers, config: SessionConfig) -> Result<Self, SessionError> {
        let session = Arc::new(Session::new(config));
        let (client, server) = duplex(DUPLEX_CAPACITY);
        session.bind(server, None, handlers)?;
        Ok(Self {
            session,
            wire: Wire::new(client),
        })
    }
}
