//! Error types for the Fast RPC layer.

use std::io;

use thiserror::Error;

use super::resolver::ResolveError;
use crate::{
    byte_buffer::ByteBufferError,
    pending::CallError,
    serializer::SerializerError,
    session::SessionError,
};

/// Violations of the Fast wire format. These close the connection.
#[derive(Debug, Error)]
pub enum FastError {
    /// Declared packet length is smaller than the fixed header.
    #[error("declared packet length {0} is shorter than the 17-byte header")]
    LengthTooSmall(i64),
    /// Declared packet length exceeds the configured ceiling.
    #[error("declared packet length {len} exceeds the {limit}-byte limit")]
    TooLarge {
        /// Declared length.
        len: usize,
        /// Configured ceiling.
        limit: usize,
    },
    /// The encoded packet would not fit the 32-bit length prefix.
    #[error("packet body of {0} bytes cannot be encoded")]
    BodyTooLarge(usize),
    /// A parameter block is truncated or has a negative length.
    #[error("malformed parameter block: {0}")]
    MalformedParams(&'static str),
    /// Buffer access failed.
    #[error(transparent)]
    Buffer(#[from] ByteBufferError),
    /// Transport failure while framing.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of server-side dispatch. Each becomes an exception reply.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered for the command.
    #[error("unknown command {0}")]
    UnknownCommand(i32),
    /// Two handlers were registered for the same command.
    #[error("command {0} is registered more than once")]
    DuplicateCommand(i32),
    /// A single-instance filter was registered twice in one scope.
    #[error("filter {0} may only be registered once per scope")]
    DuplicateFilter(&'static str),
    /// The handler's service could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Parameters did not match the handler's signature.
    #[error("invalid arguments: {0}")]
    BadArguments(String),
    /// A filter rejected the call.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Handler(String),
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
    /// The handler's result could not be serialized.
    #[error("failed to serialize result: {0}")]
    Serialize(String),
}

/// Failures observed by the calling side of an RPC.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The call failed, timed out or was answered with an exception.
    #[error(transparent)]
    Call(#[from] CallError),
    /// The session could not carry the request.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The request could not be framed.
    #[error(transparent)]
    Fast(#[from] FastError),
    /// Arguments could not be serialized.
    #[error("failed to encode arguments: {0}")]
    Encode(SerializerError),
    /// The reply body could not be deserialized.
    #[error("failed to decode reply: {0}")]
    Decode(SerializerError),
    /// Connecting to the server failed.
    #[error("connect failed: {0}")]
    Connect(io::Error),
}
