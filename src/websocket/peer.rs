//! Per-connection WebSocket state machine.
//!
//! Frames are parsed inside the session's receive pipeline. Control frames
//! are acted on immediately (a Ping is answered before anything else sees
//! it); application events are queued to a task that calls the
//! [`WebSocketHandler`] in arrival order.

use std::{
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        Mutex,
        Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::FutureExt;
use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{CloseReason, Frame, Opcode, WebSocketConfig, WebSocketHandler, WsError, close};
use crate::{
    byte_buffer::ByteBuffer,
    extensions::Extensions,
    hooks::ExceptionSource,
    metrics,
    panic::format_panic,
    pending::{CallError, PendingCallTable},
    session::{Protocol, Session, SessionError, SessionId, lock},
};

/// Which end of the connection this peer is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Accepted connection. Reads masked frames, writes unmasked ones.
    Server,
    /// Dialled connection. Writes masked frames.
    Client,
}

enum Event {
    Open,
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(u16, String),
    Error(WsError),
}

/// WebSocket endpoint bound to one session.
pub struct WebSocketPeer {
    session: Weak<Session>,
    session_id: SessionId,
    role: Role,
    config: WebSocketConfig,
    pings: PendingCallTable<Uuid, ()>,
    fragments: Mutex<Option<(Opcode, Vec<u8>)>>,
    close_sent: AtomicBool,
    finished: AtomicBool,
    close_reported: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    state: Mutex<Extensions>,
}

impl fmt::Debug for WebSocketPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketPeer")
            .field("session", &self.session_id)
            .field("role", &self.role)
            .field("close_sent", &self.close_sent.load(Ordering::Relaxed))
            .field("pings", &self.pings)
            .finish_non_exhaustive()
    }
}

impl WebSocketPeer {
    /// Attach a peer to a session that has completed the handshake and start
    /// delivering events to `handler`. Must be called within a Tokio runtime.
    pub fn start(
        session: &Arc<Session>,
        role: Role,
        handler: Arc<dyn WebSocketHandler>,
        config: WebSocketConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(Self {
            session: Arc::downgrade(session),
            session_id: session.id(),
            role,
            config,
            pings: PendingCallTable::new(),
            fragments: Mutex::new(None),
            close_sent: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            close_reported: AtomicBool::new(false),
            events: Mutex::new(Some(tx)),
            state: Mutex::new(Extensions::default()),
        });
        session.set_protocol(Protocol::WebSocket);
        session.insert_extension(Arc::clone(&peer));
        tokio::spawn(run_events(Arc::clone(&peer), handler, rx));
        peer.emit(Event::Open);
        peer
    }

    /// Peer attached to `session`, if the connection was upgraded.
    #[must_use]
    pub fn for_session(session: &Session) -> Option<Arc<Self>> { session.extension::<Self>() }

    /// The session carrying this connection while it is still connected.
    #[must_use]
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session
            .upgrade()
            .filter(|session| session.id() == self.session_id && session.is_connected())
    }

    /// Which end of the connection this is.
    #[must_use]
    pub const fn role(&self) -> Role { self.role }

    /// Returns `true` until a Close has been sent or received.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.close_sent.load(Ordering::Acquire)
            && !self.finished.load(Ordering::Acquire)
            && self.session().is_some()
    }

    /// Connection-scoped state of type `T`, created by `init` on first use.
    pub fn state_or_insert_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Arc<T>,
    {
        lock(&self.state).get_or_insert_with(init)
    }

    /// Number of pings awaiting their pong.
    #[must_use]
    pub fn pending_pings(&self) -> usize { self.pings.len() }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Closed`] once a Close has been sent, or
    /// [`WsError::Session`] if the connection is gone.
    pub fn send_text(&self, text: &str) -> Result<(), WsError> { self.send_data(Opcode::Text, text.as_bytes()) }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// As for [`send_text`](Self::send_text).
    pub fn send_binary(&self, data: &[u8]) -> Result<(), WsError> { self.send_data(Opcode::Binary, data) }

    /// Send a Ping carrying a fresh UUID and wait for the matching Pong.
    ///
    /// Returns `false` on timeout or disconnect; never fails otherwise.
    pub async fn ping_async(&self, timeout: Duration) -> bool {
        let id = Uuid::new_v4();
        let Ok(call) = self.pings.register(id, timeout) else { return false };
        if let Err(e) = self.send_data(Opcode::Ping, id.to_string().as_bytes()) {
            debug!("ping not sent: session={}, error={e}", self.session_id);
            self.pings.complete(&id, Err(CallError::ConnectionClosed));
        }
        call.await.is_ok()
    }

    /// Start the closing handshake with `code` and `reason`.
    ///
    /// Further sends fail with [`WsError::Closed`]. The connection is dropped
    /// once the peer answers, or after
    /// [`close_timeout`](WebSocketConfig::close_timeout) if it does not.
    /// Calling it again has no effect. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Session`] if the connection is already gone.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), WsError> {
        if self.close_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let session = self.session().ok_or(SessionError::NotConnected)?;
        self.write_frame(&session, Opcode::Close, &CloseReason::new(code, reason).encode())?;

        let session = Arc::downgrade(&session);
        let id = self.session_id;
        let grace = self.config.close_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(session) = session.upgrade()
                && session.id() == id
                && session.close(false).await
            {
                debug!("peer did not answer close in time: session={id}");
            }
        });
        Ok(())
    }

    /// Parse and act on every complete frame in `buffer`.
    ///
    /// Protocol violations are answered with a Close carrying the matching
    /// status code and end the connection; nothing after a Close is parsed.
    pub(crate) fn consume(&self, session: &Arc<Session>, buffer: &mut ByteBuffer) {
        let require_mask = self.role == Role::Server;
        loop {
            if self.finished.load(Ordering::Acquire) {
                buffer.clear();
                return;
            }
            let frame = match Frame::parse_with_limit(buffer, require_mask, self.config.max_message_size) {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(e) => {
                    buffer.clear();
                    self.fail(session, e);
                    return;
                }
            };
            metrics::inc_frames("websocket", metrics::Direction::Inbound);
            if let Err(e) = self.on_frame(session, frame) {
                buffer.clear();
                self.fail(session, e);
                return;
            }
        }
    }

    fn on_frame(&self, session: &Arc<Session>, frame: Frame) -> Result<(), WsError> {
        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(WsError::FragmentedControlFrame);
            }
            if frame.payload.len() > 125 {
                return Err(WsError::ControlFrameTooLarge(frame.payload.len()));
            }
        }
        match frame.opcode {
            Opcode::Ping => {
                if !self.close_sent.load(Ordering::Acquire) {
                    self.write_frame(session, Opcode::Pong, &frame.payload)?;
                }
                self.emit(Event::Ping(frame.payload));
            }
            Opcode::Pong => {
                let answered = std::str::from_utf8(&frame.payload)
                    .ok()
                    .filter(|text| text.len() == 36)
                    .and_then(|text| Uuid::parse_str(text).ok())
                    .is_some_and(|id| self.pings.complete(&id, Ok(())));
                if !answered {
                    self.emit(Event::Pong(frame.payload));
                }
            }
            Opcode::Close => {
                let reason = CloseReason::parse(&frame.payload)?;
                self.finished.store(true, Ordering::Release);
                if !self.close_sent.swap(true, Ordering::AcqRel) {
                    let echo = CloseReason::new(reason.code, "").encode();
                    if let Err(e) = self.write_frame(session, Opcode::Close, &echo) {
                        debug!("close echo not sent: session={}, error={e}", self.session_id);
                    }
                }
                debug!(
                    "websocket close received: session={}, code={}",
                    self.session_id, reason.code
                );
                self.emit_close(reason.code, reason.reason);
                session.begin_close(true);
            }
            Opcode::Text | Opcode::Binary => {
                let mut fragments = lock(&self.fragments);
                if fragments.is_some() {
                    return Err(WsError::Protocol("data frame interrupts a fragmented message"));
                }
                if frame.fin {
                    drop(fragments);
                    self.deliver(frame.opcode, frame.payload)?;
                } else {
                    *fragments = Some((frame.opcode, frame.payload.to_vec()));
                }
            }
            Opcode::Continuation => {
                let mut fragments = lock(&self.fragments);
                let Some((_, data)) = fragments.as_mut() else {
                    return Err(WsError::Protocol("continuation without a started message"));
                };
                let limit = self.config.max_message_size;
                if data.len().saturating_add(frame.payload.len()) > limit {
                    return Err(WsError::MessageTooLarge { limit });
                }
                data.extend_from_slice(&frame.payload);
                if frame.fin
                    && let Some((opcode, data)) = fragments.take()
                {
                    drop(fragments);
                    self.deliver(opcode, Bytes::from(data))?;
                }
            }
        }
        Ok(())
    }

    fn deliver(&self, opcode: Opcode, payload: Bytes) -> Result<(), WsError> {
        match opcode {
            Opcode::Text => {
                let text = String::from_utf8(payload.to_vec()).map_err(|_| WsError::InvalidUtf8)?;
                self.emit(Event::Text(text));
            }
            _ => self.emit(Event::Binary(payload)),
        }
        Ok(())
    }

    fn fail(&self, session: &Arc<Session>, error: WsError) {
        let code = error.close_code();
        let reason = error.to_string();
        session.report_exception(ExceptionSource::Receive, format!("websocket protocol error: {reason}"));
        self.finished.store(true, Ordering::Release);
        if !self.close_sent.swap(true, Ordering::AcqRel)
            && let Err(e) = self.write_frame(session, Opcode::Close, &CloseReason::new(code, &reason).encode())
        {
            debug!("close not sent: session={}, error={e}", self.session_id);
        }
        self.emit(Event::Error(error));
        self.emit_close(code, reason);
        session.begin_close(true);
    }

    /// Tear down after the session disconnected.
    pub(crate) fn on_disconnect(&self) {
        self.finished.store(true, Ordering::Release);
        lock(&self.fragments).take();
        let failed = self.pings.take_all();
        if failed > 0 {
            debug!("pings failed on disconnect: session={}, pings={failed}", self.session_id);
        }
        self.emit_close(close::ABNORMAL, "connection closed without a close frame".to_owned());
        lock(&self.events).take();
    }

    fn send_data(&self, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        if self.close_sent.load(Ordering::Acquire) || self.finished.load(Ordering::Acquire) {
            return Err(WsError::Closed);
        }
        let session = self.session().ok_or(SessionError::NotConnected)?;
        self.write_frame(&session, opcode, payload)
    }

    fn write_frame(&self, session: &Arc<Session>, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        let wire = Frame::build(opcode, payload, true, self.role == Role::Client);
        session.send(&wire)?;
        Ok(())
    }

    fn emit_close(&self, code: u16, reason: String) {
        if !self.close_reported.swap(true, Ordering::AcqRel) {
            self.emit(Event::Close(code, reason));
        }
    }

    fn emit(&self, event: Event) {
        if let Some(events) = lock(&self.events).as_ref() {
            // The event task only stops after the sender is dropped.
            let _ = events.send(event);
        }
    }
}

async fn run_events(
    peer: Arc<WebSocketPeer>,
    handler: Arc<dyn WebSocketHandler>,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = events.recv().await {
        let delivered = AssertUnwindSafe(deliver_event(&peer, handler.as_ref(), event))
            .catch_unwind()
            .await;
        if let Err(panic) = delivered {
            let message = format!("websocket handler panicked: {}", format_panic(panic.as_ref()));
            match peer.session.upgrade().filter(|s| s.id() == peer.session_id) {
                Some(session) => session.report_exception(ExceptionSource::Handler, message),
                None => log::error!("{message}: session={}", peer.session_id),
            }
        }
    }
}

async fn deliver_event(peer: &Arc<WebSocketPeer>, handler: &dyn WebSocketHandler, event: Event) {
    match event {
        Event::Open => handler.on_open(peer).await,
        Event::Text(text) => handler.on_text(peer, text).await,
        Event::Binary(data) => handler.on_binary(peer, data).await,
        Event::Ping(payload) => handler.on_ping(peer, payload).await,
        Event::Pong(payload) => handler.on_pong(peer, payload).await,
        Event::Close(code, reason) => handler.on_close(peer, code, reason).await,
        Event::Error(error) => handler.on_error(peer, error).await,
    }
}
