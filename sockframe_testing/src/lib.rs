//! Utilities for exercising `sockframe` sessions and servers in tests.
//!
//! [`Wire`] wraps the client end of a connection and decodes Fast packets,
//! WebSocket frames and HTTP response heads from it. [`SessionPair`] binds a
//! session to an in-memory duplex stream, and [`TestServer`] runs a real
//! [`SocketServer`](sockframe::SocketServer) on an ephemeral port.
//!
//! ```rust,no_run
//! use sockframe::MiddlewareChain;
//! use sockframe_testing::{SessionPair, TestResult};
//!
//! # async fn example(chain: MiddlewareChain) -> TestResult {
//! let mut pair = SessionPair::bind(chain)?;
//! pair.wire.write(b"ping").await?;
//! let reply = pair.wire.read_exact(4).await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod frames;
pub mod metrics;
pub mod server;
pub mod wire;

pub use frames::{fast_request, masked_frame, upgrade_request};
pub use metrics::{MetricsSnapshot, debugging_recorder};
pub use server::{TestServer, unused_listener};
pub use wire::{IO_TIMEOUT, SessionPair, Wire};

/// Shared result type for integration tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
