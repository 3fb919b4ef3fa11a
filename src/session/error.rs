//! Errors raised by [`Session`](super::Session) and
//! [`SessionPool`](super::SessionPool) operations.

use std::io;

use thiserror::Error;

/// Failures of session binding and sending.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is not bound to a live connection.
    #[error("session is not connected")]
    NotConnected,
    /// `bind` was called on a session that is still bound.
    #[error("session is already bound")]
    AlreadyBound,
    /// The session factory failed to produce a session.
    #[error("session factory failed: {0}")]
    Create(String),
    /// Socket I/O failed.
    #[error("session I/O error: {0}")]
    Io(#[from] io::Error),
}
