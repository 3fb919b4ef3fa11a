use std::io;

use thiserror::Error;

use super::close;
use crate::{http::HttpError, session::SessionError};

/// WebSocket protocol violations and send failures.
#[derive(Debug, Error)]
pub enum WsError {
    /// Opcode is not one of the six defined values.
    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u8),
    /// RSV1-3 set without a negotiated extension.
    #[error("reserved bits set without an extension")]
    ReservedBitsSet,
    /// A client frame arrived without a mask.
    #[error("client frame is not masked")]
    UnmaskedClientFrame,
    /// Control frame payload longer than 125 bytes.
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(usize),
    /// Control frame without FIN.
    #[error("control frame is fragmented")]
    FragmentedControlFrame,
    /// Text payload or close reason is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    /// Close payload is one byte long or carries a reserved code.
    #[error("invalid close payload")]
    InvalidClosePayload,
    /// A single frame declares more payload than allowed.
    #[error("frame payload of {len} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge {
        /// Declared payload length.
        len: u64,
        /// Configured ceiling.
        limit: usize,
    },
    /// A reassembled message grew beyond the allowed size.
    #[error("message exceeds the {limit}-byte limit")]
    MessageTooLarge {
        /// Configured ceiling.
        limit: usize,
    },
    /// Any other framing violation.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    /// A close frame has already been sent.
    #[error("connection is closing")]
    Closed,
    /// The session refused the frame.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl WsError {
    /// Close code reported to the peer for this failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use sockframe::websocket::WsError;
    ///
    /// assert_eq!(WsError::InvalidOpcode(0x3).close_code(), 1002);
    /// assert_eq!(WsError::InvalidUtf8.close_code(), 1007);
    /// ```
    #[must_use]
    pub const fn close_code(&self) -> u16 {
        match self {
            Self::InvalidOpcode(_)
            | Self::ReservedBitsSet
            | Self::UnmaskedClientFrame
            | Self::ControlFrameTooLarge(_)
            | Self::FragmentedControlFrame
            | Self::InvalidClosePayload
            | Self::Protocol(_) => close::PROTOCOL_ERROR,
            Self::InvalidUtf8 => close::INVALID_PAYLOAD,
            Self::PayloadTooLarge { .. } | Self::MessageTooLarge { .. } => close::MESSAGE_TOO_BIG,
            Self::Closed | Self::Session(_) => close::INTERNAL_ERROR,
        }
    }
}

/// Failure to establish a client connection.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// TCP connect failed.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),
    /// The server's response was not valid HTTP.
    #[error(transparent)]
    Http(#[from] HttpError),
    /// The server answered with something other than `101`.
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
    /// A required upgrade header is missing or wrong.
    #[error("missing or invalid {0} header")]
    BadHeader(&'static str),
    /// `Sec-WebSocket-Accept` does not match the key sent.
    #[error("Sec-WebSocket-Accept does not match")]
    AcceptMismatch,
    /// No response within the handshake timeout.
    #[error("handshake timed out")]
    Timeout,
    /// The connection closed during the handshake.
    #[error("connection closed during handshake")]
    Closed,
    /// The session could not carry the request.
    #[error(transparent)]
    Session(#[from] SessionError),
}
