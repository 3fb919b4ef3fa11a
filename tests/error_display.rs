//! Tests for Display implementations on error types.

use std::io;

use rstest::rstest;
use sockframe::{
    ByteBufferError,
    MiddlewareError,
    ServerError,
    SessionError,
    fast::{DispatchError, FastError, RpcError},
    http::HttpError,
    pending::CallError,
    websocket::{HandshakeError, WsError},
};

#[test]
fn session_error_messages() {
    assert_eq!(SessionError::NotConnected.to_string(), "session is not connected");
    assert_eq!(SessionError::AlreadyBound.to_string(), "session is already bound");
    assert_eq!(
        SessionError::Create("exhausted".into()).to_string(),
        "session factory failed: exhausted"
    );
    let io = SessionError::from(io::Error::other("reset"));
    assert_eq!(io.to_string(), "session I/O error: reset");
}

#[test]
fn server_error_keeps_source() {
    let err = ServerError::Bind(io::Error::new(io::ErrorKind::AddrInUse, "in use"));
    assert_eq!(err.to_string(), "bind error: in use");
    assert!(std::error::Error::source(&err).is_some());
}

#[rstest]
#[case(FastError::LengthTooSmall(3), "declared packet length 3 is shorter than the 17-byte header")]
#[case(
    FastError::TooLarge { len: 2048, limit: 1024 },
    "declared packet length 2048 exceeds the 1024-byte limit"
)]
#[case(FastError::MalformedParams("truncated"), "malformed parameter block: truncated")]
fn fast_error_messages(#[case] err: FastError, #[case] expected: &str) {
    assert_eq!(err.to_string(), expected);
}

#[rstest]
#[case(DispatchError::UnknownCommand(999), "unknown command 999")]
#[case(DispatchError::DuplicateCommand(4), "command 4 is registered more than once")]
#[case(DispatchError::BadArguments("missing".into()), "invalid arguments: missing")]
#[case(DispatchError::Rejected("quota".into()), "rejected: quota")]
#[case(DispatchError::Panicked("boom".into()), "handler panicked: boom")]
fn dispatch_error_messages(#[case] err: DispatchError, #[case] expected: &str) {
    assert_eq!(err.to_string(), expected);
}

#[test]
fn rpc_error_is_transparent_over_call_error() {
    assert_eq!(CallError::Timeout.to_string(), "call timed out");
    assert_eq!(
        RpcError::from(CallError::Remote("unknown command 7".into())).to_string(),
        "remote exception: unknown command 7"
    );
    assert_eq!(
        RpcError::from(CallError::ConnectionClosed).to_string(),
        "connection closed before a reply arrived"
    );
}

#[rstest]
#[case(WsError::InvalidOpcode(0x3), "invalid opcode 0x3")]
#[case(WsError::ControlFrameTooLarge(126), "control frame payload of 126 bytes exceeds 125")]
#[case(WsError::MessageTooLarge { limit: 10 }, "message exceeds the 10-byte limit")]
#[case(WsError::Session(SessionError::NotConnected), "session is not connected")]
fn websocket_error_messages(#[case] err: WsError, #[case] expected: &str) {
    assert_eq!(err.to_string(), expected);
}

#[test]
fn handshake_error_messages() {
    assert_eq!(HandshakeError::UnexpectedStatus(404).to_string(), "unexpected status 404");
    assert_eq!(
        HandshakeError::BadHeader("Upgrade").to_string(),
        "missing or invalid Upgrade header"
    );
    assert_eq!(
        HandshakeError::from(HttpError::BadStatusLine).to_string(),
        "malformed status line"
    );
}

#[test]
fn middleware_error_wraps_protocol_errors() {
    assert_eq!(
        MiddlewareError::BufferLimit { limit: 64 }.to_string(),
        "inbound buffer exceeded 64 bytes"
    );
    assert_eq!(
        MiddlewareError::from(HttpError::HeadTooLarge { limit: 8 }).to_string(),
        "message head exceeds 8 bytes"
    );
    let buffer = ByteBufferError::OutOfRange {
        offset: 2,
        len: 4,
        available: 3,
    };
    assert_eq!(
        MiddlewareError::from(FastError::from(buffer)).to_string(),
        "range 2..2+4 exceeds buffered length 3"
    );
}
