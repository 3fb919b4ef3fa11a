//! Fast: length-prefixed binary RPC.
//!
//! Each request is a [`FastPacket`] naming a command and carrying a
//! correlation id; the peer answers with a packet echoing both, flagged as an
//! exception when the call failed. [`FastMiddleware`] parses packets out of a
//! session's buffer, [`FastRouter`] dispatches requests to handlers, and
//! [`FastPeer`] correlates replies with outstanding calls.

mod client;
mod config;
mod dispatch;
mod error;
mod filter;
mod middleware;
mod packet;
mod params;
mod peer;
mod resolver;

pub use client::FastClient;
pub use config::{DEFAULT_MAX_PACKET_LEN, FastConfig};
pub use dispatch::{FastContext, FastRouter, FastRouterBuilder};
pub use error::{DispatchError, FastError, RpcError};
pub use filter::{ActionFilter, ExceptionDisposition, FilterScope};
pub use middleware::FastMiddleware;
pub use packet::{FastPacket, FastPacketCodec, HEADER_LEN};
pub use params::{FromParams, IntoParams, decode_params, encode_params};
pub use peer::FastPeer;
pub use resolver::{ResolveError, ServiceInstance, ServiceResolver, StaticResolver};
