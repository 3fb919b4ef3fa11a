//! Aggregate configuration.
//!
//! Every tunable struct derives `serde::Deserialize` with `#[serde(default)]`,
//! so applications can load any subset from their own config format.
//! Durations are written as whole milliseconds, except TCP keep-alive which
//! uses seconds.

use serde::Deserialize;

use crate::{
    fast::FastConfig,
    server::BackoffConfig,
    session::SessionConfig,
    websocket::WebSocketConfig,
};

/// Everything a [`SocketServer`](crate::server::SocketServer) and its
/// protocol stages can be tuned with.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use sockframe::config::ServerConfig;
///
/// let config: ServerConfig = serde_json::from_str(
///     r#"{"workers": 2, "fast": {"call_timeout": 1500}, "session": {"keepalive": null}}"#,
/// )
/// .expect("valid config");
/// assert_eq!(config.workers, 2);
/// assert_eq!(config.fast.call_timeout, Duration::from_millis(1500));
/// assert_eq!(config.session.keepalive, None);
/// assert_eq!(config.websocket.handshake_timeout, Duration::from_secs(10));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Accept tasks sharing the listener.
    pub workers: usize,
    /// Accept error back-off.
    pub backoff: BackoffConfig,
    /// Per-connection I/O settings.
    pub session: SessionConfig,
    /// Fast RPC settings.
    pub fast: FastConfig,
    /// WebSocket settings.
    pub websocket: WebSocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            backoff: BackoffConfig::default(),
            session: SessionConfig::default(),
            fast: FastConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

/// `deserialize_with` helpers for [`Duration`](std::time::Duration) fields.
pub mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    /// Whole milliseconds.
    ///
    /// # Errors
    ///
    /// Fails when the value is not an unsigned integer.
    pub fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// Whole seconds or `null`.
    ///
    /// # Errors
    ///
    /// Fails when the value is neither `null` nor an unsigned integer.
    pub fn deserialize_opt_secs<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").expect("valid");
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn nested_durations_use_their_units() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"session": {"keepalive": 30, "drain_timeout": 250}, "websocket": {"close_timeout": 10}}"#,
        )
        .expect("valid");
        assert_eq!(config.session.keepalive, Some(Duration::from_secs(30)));
        assert_eq!(config.session.drain_timeout, Duration::from_millis(250));
        assert_eq!(config.websocket.close_timeout, Duration::from_millis(10));
    }

    #[test]
    fn negative_duration_is_rejected() {
        assert!(serde_json::from_str::<FastConfig>(r#"{"call_timeout": -1}"#).is_err());
    }
}
