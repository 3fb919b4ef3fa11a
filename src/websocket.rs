//! WebSocket (RFC 6455) over sessions.
//!
//! [`WebSocketMiddleware`] upgrades qualifying HTTP requests and hands the
//! connection to a [`WebSocketPeer`], which parses frames, answers pings,
//! reassembles fragmented messages and runs the close handshake before
//! passing events to a [`WebSocketHandler`]. [`WebSocketClient`] is the
//! dialling side, and [`JsonRpcHandler`]/[`JsonRpcPeer`] layer JSON
//! request/reply messaging over text frames.

mod client;
pub mod close;
mod config;
mod error;
mod frame;
mod handler;
mod handshake;
mod middleware;
mod peer;
mod rpc;

pub use client::WebSocketClient;
pub use close::CloseReason;
pub use config::WebSocketConfig;
pub use error::{HandshakeError, WsError};
pub use frame::{Frame, Opcode, apply_mask};
pub use handler::{EchoHandler, WebSocketHandler};
pub use handshake::{ClientHandshake, UpgradeRequest, accept_response, compute_accept_key, generate_key};
pub use middleware::WebSocketMiddleware;
pub use peer::{Role, WebSocketPeer};
pub use rpc::{JsonRpcError, JsonRpcHandler, JsonRpcPeer, RpcMessage};
