use std::time::Duration;

use serde::Deserialize;

use crate::config::duration;

/// WebSocket limits and timeouts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest frame payload and largest reassembled message.
    pub max_message_size: usize,
    /// Client-side limit on connecting plus the upgrade exchange.
    #[serde(deserialize_with = "duration::deserialize_millis")]
    pub handshake_timeout: Duration,
    /// How long a locally initiated close waits for the peer's Close before
    /// dropping the connection.
    #[serde(deserialize_with = "duration::deserialize_millis")]
    pub close_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            handshake_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}
