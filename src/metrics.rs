//! Metric helpers for `sockframe`.
//!
//! This module defines metric names and thin helpers wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking bound sessions.
pub const SESSIONS_ACTIVE: &str = "sockframe_sessions_active";
/// Name of the counter tracking decoded and encoded protocol units.
pub const FRAMES_PROCESSED: &str = "sockframe_frames_processed_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "sockframe_errors_total";
/// Name of the counter tracking calls that expired without a reply.
pub const CALLS_TIMED_OUT: &str = "sockframe_calls_timed_out_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames received from the peer.
    Inbound,
    /// Frames sent to the peer.
    Outbound,
}

impl Direction {
    /// Label value used for this direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Increment the bound sessions gauge.
pub fn inc_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

/// Decrement the bound sessions gauge.
pub fn dec_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for `protocol` in the given direction.
pub fn inc_frames(protocol: &'static str, direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "protocol" => protocol, "direction" => direction.as_str())
        .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (protocol, direction);
}

/// Record an error occurrence of the given kind.
pub fn inc_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a call that expired before its reply arrived.
pub fn inc_call_timeouts() {
    #[cfg(feature = "metrics")]
    counter!(CALLS_TIMED_OUT).increment(1);
}
