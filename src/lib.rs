#![doc(html_root_url = "https://docs.rs/sockframe/latest")]
//! Public API for the `sockframe` library.
//!
//! This crate provides a pooled TCP session engine with a pluggable receive
//! pipeline, plus protocol stages for Fast binary RPC, WebSocket (including
//! JSON RPC over text frames) and minimal HTTP/1.x.

pub mod byte_buffer;
pub mod byte_order;
pub mod config;
pub mod extensions;
pub mod fast;
pub mod hooks;
pub mod http;
pub mod metrics;
pub mod middleware;
pub mod panic;
pub mod pending;
pub mod serializer;
pub mod server;
pub mod session;
pub mod websocket;

pub use byte_buffer::{ByteBuffer, ByteBufferError};
pub use byte_order::Endianness;
pub use config::ServerConfig;
pub use hooks::{ExceptionEvent, ExceptionSource, SessionHooks};
pub use metrics::{CALLS_TIMED_OUT, Direction, ERRORS_TOTAL, FRAMES_PROCESSED, SESSIONS_ACTIVE};
pub use middleware::{Middleware, MiddlewareChain, MiddlewareError, Next};
pub use pending::PendingCallTable;
pub use serializer::{BincodeSerializer, JsonSerializer, Serializer};
pub use server::{ServerError, SocketServer};
pub use session::{Session, SessionConfig, SessionError, SessionId, SessionPool, SessionState};
