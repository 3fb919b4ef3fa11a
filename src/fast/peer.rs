//! Per-connection Fast endpoint.
//!
//! A [`FastPeer`] is attached to a session by [`FastMiddleware`] and owns the
//! session's correlation table. It issues outbound calls and routes inbound
//! packets either to a waiting caller or to the router.
//!
//! Call ids come from one process-wide counter, so no two peers in a process
//! ever share an outstanding id. The wire format has no request/reply bit: an
//! inbound packet whose id matches a pending call is taken as its reply. When
//! both ends of one connection issue calls, the two processes must therefore
//! draw ids from disjoint ranges.
//!
//! [`FastMiddleware`]: super::FastMiddleware

use std::{
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicI64, Ordering},
    },
};

use bytes::Bytes;
use futures::FutureExt;
use log::debug;
use serde::de::DeserializeOwned;

use super::{
    DispatchError,
    FastConfig,
    FastContext,
    FastPacket,
    FastRouter,
    IntoParams,
    RpcError,
    encode_params,
};
use crate::{
    hooks::ExceptionSource,
    metrics,
    panic::format_panic,
    pending::{CallError, PendingCallTable},
    serializer::{BincodeSerializer, Serializer},
    session::{Session, SessionError},
};

static NEXT_CALL_ID: AtomicI64 = AtomicI64::new(1);

/// Fast endpoint bound to one session.
pub struct FastPeer<S = BincodeSerializer> {
    session: Weak<Session>,
    pending: PendingCallTable<i64, Bytes>,
    router: Option<Arc<FastRouter<S>>>,
    serializer: Arc<S>,
    config: FastConfig,
}

impl<S> fmt::Debug for FastPeer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastPeer")
            .field("pending", &self.pending)
            .field("has_router", &self.router.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: Serializer> FastPeer<S> {
    pub(crate) fn new(
        session: &Arc<Session>,
        router: Option<Arc<FastRouter<S>>>,
        serializer: Arc<S>,
        config: FastConfig,
    ) -> Self {
        Self {
            session: Arc::downgrade(session),
            pending: PendingCallTable::new(),
            router,
            serializer,
            config,
        }
    }

    /// Peer attached to `session`, if a Fast stage claimed it.
    #[must_use]
    pub fn for_session(session: &Session) -> Option<Arc<Self>> { session.extension::<Self>() }

    /// Number of calls awaiting a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize { self.pending.len() }

    /// Send `body` as `command` and await the raw reply body.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Call`] on timeout, disconnect or a remote
    /// exception, and [`RpcError::Session`] if the request cannot be sent.
    pub async fn invoke_raw(&self, command: i32, body: Bytes) -> Result<Bytes, RpcError> {
        let session = self.session.upgrade().ok_or(SessionError::NotConnected)?;
        let id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let request = FastPacket::new(command, id, body).encode()?;
        let call = self.pending.register(id, self.config.call_timeout)?;
        if let Err(e) = session.send(&request) {
            self.pending.complete(&id, Err(CallError::ConnectionClosed));
            return Err(e.into());
        }
        metrics::inc_frames("fast", metrics::Direction::Outbound);
        Ok(call.await?)
    }

    /// Call `command` with typed arguments and decode the typed result.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Encode`] or [`RpcError::Decode`] when marshaling
    /// fails, otherwise the errors of [`invoke_raw`](Self::invoke_raw).
    pub async fn invoke_api<A, R>(&self, command: i32, args: A) -> Result<R, RpcError>
    where
        A: IntoParams,
        R: DeserializeOwned,
    {
        let params = args
            .into_params(self.serializer.as_ref())
            .map_err(RpcError::Encode)?;
        let reply = self.invoke_raw(command, encode_params(&params)?).await?;
        self.serializer.deserialize(&reply).map_err(RpcError::Decode)
    }

    /// Route one inbound packet.
    ///
    /// Replies complete their pending call; replies nobody waits for are
    /// dropped. Requests are dispatched to the router on their own task and
    /// answered with a reply or an exception packet.
    pub fn handle_packet(&self, session: &Arc<Session>, packet: FastPacket) {
        metrics::inc_frames("fast", metrics::Direction::Inbound);
        if self.pending.contains(&packet.id) {
            let result = if packet.is_exception {
                Err(CallError::Remote(packet.error_message()))
            } else {
                Ok(packet.body)
            };
            if !self.pending.complete(&packet.id, result) {
                debug!("reply arrived after its call ended: id={}", packet.id);
            }
            return;
        }
        if packet.is_exception {
            debug!(
                "dropping exception for unknown call: command={}, id={}",
                packet.command, packet.id
            );
            return;
        }
        let Some(router) = &self.router else {
            debug!(
                "dropping request on client peer: command={}, id={}",
                packet.command, packet.id
            );
            return;
        };
        tokio::spawn(respond(Arc::clone(router), Arc::clone(session), packet));
    }

    /// Fail every outstanding call with [`CallError::ConnectionClosed`].
    pub fn fail_all(&self) -> usize { self.pending.take_all() }
}

async fn respond<S: Serializer>(router: Arc<FastRouter<S>>, session: Arc<Session>, packet: FastPacket) {
    let (command, id) = (packet.command, packet.id);
    let ctx = FastContext::new(Arc::clone(&session), packet);
    let outcome = AssertUnwindSafe(router.dispatch(ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(DispatchError::Panicked(format_panic(panic.as_ref()).to_string())));
    let reply = match outcome {
        Ok(body) => FastPacket::new(command, id, body),
        Err(err) => {
            session.report_exception(
                ExceptionSource::Handler,
                format!("command {command} failed: {err}"),
            );
            FastPacket::exception(command, id, &err.to_string())
        }
    };
    let sent = reply
        .encode()
        .map_err(|e| e.to_string())
        .and_then(|bytes| session.send(&bytes).map_err(|e| e.to_string()));
    match sent {
        Ok(()) => metrics::inc_frames("fast", metrics::Direction::Outbound),
        Err(e) => debug!("failed to send reply: command={command}, id={id}, error={e}"),
    }
}
