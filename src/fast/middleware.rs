use std::{fmt, sync::Arc};

use log::debug;

use super::{FastConfig, FastPacket, FastPeer, FastRouter};
use crate::{
    byte_buffer::ByteBuffer,
    middleware::{Middleware, MiddlewareError, Next},
    serializer::{BincodeSerializer, Serializer},
    session::{Protocol, Session},
};

/// Receive stage speaking Fast on every connection of its chain.
///
/// The stage claims the stream as soon as the session binds, so it belongs on
/// a listener dedicated to Fast. Every complete packet in the buffer is parsed
/// and handed to the session's [`FastPeer`]; a malformed length prefix closes
/// the connection.
pub struct FastMiddleware<S = BincodeSerializer> {
    router: Option<Arc<FastRouter<S>>>,
    serializer: Arc<S>,
    config: FastConfig,
}

impl<S> fmt::Debug for FastMiddleware<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastMiddleware")
            .field("router", &self.router)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: Serializer> FastMiddleware<S> {
    /// Serve requests with `router`.
    #[must_use]
    pub fn server(router: FastRouter<S>, config: FastConfig) -> Self {
        let serializer = Arc::clone(router.serializer());
        Self {
            router: Some(Arc::new(router)),
            serializer,
            config,
        }
    }

    /// Issue calls only; inbound requests are dropped.
    #[must_use]
    pub fn client(serializer: S, config: FastConfig) -> Self {
        Self {
            router: None,
            serializer: Arc::new(serializer),
            config,
        }
    }
}

impl<S: Serializer> Middleware for FastMiddleware<S> {
    fn on_connect(&self, session: &Arc<Session>) {
        session.set_protocol(Protocol::Fast);
        session.insert_extension(Arc::new(FastPeer::new(
            session,
            self.router.clone(),
            Arc::clone(&self.serializer),
            self.config.clone(),
        )));
    }

    fn on_received(
        &self,
        session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        let Some(peer) = FastPeer::<S>::for_session(session) else {
            return next.run(session, buffer);
        };
        while let Some(packet) = FastPacket::parse(buffer, self.config.max_packet_len)? {
            peer.handle_packet(session, packet);
        }
        Ok(())
    }

    fn on_disconnect(&self, session: &Arc<Session>) {
        if let Some(peer) = FastPeer::<S>::for_session(session) {
            let failed = peer.fail_all();
            if failed > 0 {
                debug!("failed pending calls on disconnect: session={}, calls={failed}", session.id());
            }
        }
    }
}
