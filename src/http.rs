//! Minimal HTTP/1.x support.
//!
//! Enough HTTP to recognise WebSocket upgrades and answer simple requests:
//! an incremental request parser, a response-head parser for the client side
//! of the handshake, a response builder, and [`HttpMiddleware`] for plain
//! request/response traffic.

mod error;
mod middleware;
mod request;
mod response;

pub use error::HttpError;
pub use middleware::{HttpHandler, HttpMiddleware, NotFound};
pub use request::{DEFAULT_MAX_BODY, DEFAULT_MAX_HEAD, Headers, HttpRequest, HttpResponseHead, Version};
pub use response::HttpResponse;
