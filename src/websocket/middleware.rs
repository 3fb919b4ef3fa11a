use std::{fmt, sync::Arc};

use log::debug;

use super::{UpgradeRequest, WebSocketConfig, WebSocketHandler, WebSocketPeer, WsError, peer::Role};
use crate::{
    byte_buffer::ByteBuffer,
    http::{HttpRequest, HttpResponse},
    middleware::{Middleware, MiddlewareError, Next},
    session::{Protocol, Session},
};

/// Receive stage that upgrades qualifying HTTP requests to WebSocket.
///
/// Requests that are not upgrades are left in the buffer for the next stage,
/// so this stage is usually followed by an
/// [`HttpMiddleware`](crate::http::HttpMiddleware). When it is last in the
/// chain such requests are answered with `426 Upgrade Required`.
pub struct WebSocketMiddleware {
    handler: Arc<dyn WebSocketHandler>,
    config: WebSocketConfig,
}

impl fmt::Debug for WebSocketMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketMiddleware")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WebSocketMiddleware {
    /// Deliver upgraded connections to `handler`.
    #[must_use]
    pub fn new<H: WebSocketHandler>(handler: H, config: WebSocketConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
        }
    }

    fn upgrade(
        &self,
        session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        let (request, used) = match HttpRequest::parse(buffer.as_slice()) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Ok(()),
            Err(e) if next.is_empty() => return Err(e.into()),
            Err(_) => return next.run(session, buffer),
        };
        let Some(upgrade) = UpgradeRequest::detect(&request) else {
            if !next.is_empty() {
                return next.run(session, buffer);
            }
            buffer.clear();
            let refusal = HttpResponse::new(426)
                .header("Upgrade", "websocket")
                .header("Sec-WebSocket-Version", "13")
                .text("websocket upgrade required");
            session.send(&refusal.to_bytes()).map_err(WsError::from)?;
            session.begin_close(true);
            return Ok(());
        };

        buffer
            .remove(used)
            .map_err(|e| MiddlewareError::Other(Box::new(e)))?;
        session.send(&upgrade.accept().to_bytes()).map_err(WsError::from)?;
        debug!(
            "websocket upgraded: session={}, path={}",
            session.id(),
            upgrade.path
        );
        let peer = WebSocketPeer::start(
            session,
            Role::Server,
            Arc::clone(&self.handler),
            self.config.clone(),
        );
        peer.consume(session, buffer);
        Ok(())
    }
}

impl Middleware for WebSocketMiddleware {
    fn on_received(
        &self,
        session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        match session.protocol() {
            Protocol::WebSocket => {
                match WebSocketPeer::for_session(session) {
                    Some(peer) => peer.consume(session, buffer),
                    None => buffer.clear(),
                }
                Ok(())
            }
            Protocol::Unknown | Protocol::Http => self.upgrade(session, buffer, next),
            Protocol::Fast => next.run(session, buffer),
        }
    }

    fn on_disconnect(&self, session: &Arc<Session>) {
        if let Some(peer) = WebSocketPeer::for_session(session) {
            peer.on_disconnect();
        }
    }
}
