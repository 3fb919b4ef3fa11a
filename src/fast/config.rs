//! Fast RPC tunables.

use std::time::Duration;

use serde::Deserialize;

use crate::config::duration;

/// Default ceiling on a single packet, header included.
pub const DEFAULT_MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

/// Fast RPC settings shared by clients and servers.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FastConfig {
    /// How long an outbound call waits for its reply.
    #[serde(deserialize_with = "duration::deserialize_millis")]
    pub call_timeout: Duration,
    /// Largest accepted packet; longer declared lengths close the connection.
    pub max_packet_len: usize,
}

impl Default for FastConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
        }
    }
}
