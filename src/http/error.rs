use thiserror::Error;

/// Malformed or oversized HTTP message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Request line is not `METHOD SP target SP version`.
    #[error("malformed request line")]
    BadRequestLine,
    /// Status line is not `version SP code SP reason`.
    #[error("malformed status line")]
    BadStatusLine,
    /// Header line lacks a colon or has an empty name.
    #[error("malformed header line")]
    BadHeader,
    /// Only HTTP/1.0 and HTTP/1.1 are understood.
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    /// `Content-Length` is not a non-negative integer, or appears twice with
    /// different values.
    #[error("invalid Content-Length")]
    BadContentLength,
    /// Chunked bodies are not accepted.
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
    /// The message head is not valid UTF-8.
    #[error("message head is not valid UTF-8")]
    NotUtf8,
    /// The head did not terminate within the limit.
    #[error("message head exceeds {limit} bytes")]
    HeadTooLarge {
        /// Configured ceiling.
        limit: usize,
    },
    /// The declared body exceeds the limit.
    #[error("message body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured ceiling.
        limit: usize,
    },
}
