//! Tunables applied to every binding of a [`Session`](super::Session).

use std::time::Duration;

use serde::Deserialize;

use crate::{byte_order::Endianness, config::duration};

/// Default size of each socket read and of each queued write chunk.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 8 * 1024;
/// Default ceiling on unparsed inbound bytes.
pub const DEFAULT_MAX_BUFFERED: usize = 16 * 1024 * 1024;

/// Session I/O settings.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use sockframe::session::SessionConfig;
///
/// let config = SessionConfig {
///     keepalive: None,
///     ..SessionConfig::default()
/// };
/// assert_eq!(config.io_buffer_size, 8192);
/// assert_eq!(config.drain_timeout, Duration::from_secs(5));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bytes read per socket read and maximum size of one queued write.
    pub io_buffer_size: usize,
    /// Inbound bytes that may sit unparsed before the session is closed.
    pub max_buffered: usize,
    /// TCP keep-alive idle time; `None` leaves the OS default.
    #[serde(deserialize_with = "duration::deserialize_opt_secs")]
    pub keepalive: Option<Duration>,
    /// Disable Nagle's algorithm on TCP bindings.
    pub nodelay: bool,
    /// Upper bound on waiting for queued sends during a graceful close.
    #[serde(deserialize_with = "duration::deserialize_millis")]
    pub drain_timeout: Duration,
    /// Byte order of the inbound [`ByteBuffer`](crate::byte_buffer::ByteBuffer).
    pub endianness: Endianness,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
            max_buffered: DEFAULT_MAX_BUFFERED,
            keepalive: Some(Duration::from_secs(60)),
            nodelay: true,
            drain_timeout: Duration::from_secs(5),
            endianness: Endianness::Big,
        }
    }
}
