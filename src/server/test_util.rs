//! Test helpers shared across server modules.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use rstest::fixture;

use super::{Bound, SocketServer};
use crate::{
    byte_buffer::ByteBuffer,
    middleware::{Middleware, MiddlewareChain, MiddlewareError, Next},
    session::Session,
};

/// Stage that writes every received byte straight back.
pub struct Echo;

impl Middleware for Echo {
    fn on_received(
        &self,
        session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        _next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        let bytes = buffer.to_array();
        buffer.clear();
        session
            .send(&bytes)
            .map_err(|e| MiddlewareError::Other(Box::new(e)))
    }
}

#[fixture]
pub fn echo_chain() -> MiddlewareChain { MiddlewareChain::builder().push(Echo).build() }

#[fixture]
/// Returns a bound [`TcpListener`] on a free port for use in tests.
///
/// Keeping the listener bound prevents races where another process claims
/// the port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

#[must_use]
pub fn listener_addr(listener: &StdTcpListener) -> SocketAddr {
    listener
        .local_addr()
        .expect("failed to get listener address")
}

pub fn bind_server(chain: MiddlewareChain, listener: StdTcpListener) -> SocketServer<Bound> {
    SocketServer::new(chain)
        .bind_existing_listener(listener)
        .expect("Failed to bind")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_addr_matches_local_addr() {
        let listener = free_listener();
        assert_eq!(
            listener_addr(&listener),
            listener.local_addr().expect("failed to get address")
        );
        assert!(listener_addr(&listener).ip().is_loopback());
    }
}
