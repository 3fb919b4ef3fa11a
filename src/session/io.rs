//! Receive and send tasks backing a bound [`Session`].

use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    pin::pin,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use log::debug;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::Notify,
};
use tokio_util::sync::CancellationToken;

use super::{CLOSING, Session, SessionHandlers, SessionId, UNBOUND, lock};
use crate::{
    hooks::{ExceptionEvent, ExceptionSource},
    metrics,
    middleware::MiddlewareError,
    panic::format_panic,
};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Resources owned by one connection of a session.
///
/// Tasks spawned for a connection hold their own `Arc<Binding>`, so a task
/// that outlives its connection can never touch the next one.
pub(super) struct Binding {
    pub(super) id: SessionId,
    pub(super) remote: Option<SocketAddr>,
    pub(super) handlers: SessionHandlers,
    token: CancellationToken,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    outbound: Mutex<VecDeque<Bytes>>,
    in_flight: AtomicUsize,
    drained: Notify,
    finalized: AtomicBool,
}

impl Binding {
    pub(super) fn new(
        id: SessionId,
        remote: Option<SocketAddr>,
        writer: BoxedWriter,
        handlers: SessionHandlers,
    ) -> Self {
        Self {
            id,
            remote,
            handlers,
            token: CancellationToken::new(),
            writer: tokio::sync::Mutex::new(Some(writer)),
            outbound: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            finalized: AtomicBool::new(false),
        }
    }

    pub(super) fn pending(&self) -> usize { self.in_flight.load(Ordering::Acquire) }

    /// Queue `chunks` back to back. Returns `true` when the caller must start
    /// a drain task because the queue was idle.
    pub(super) fn enqueue(&self, chunks: impl Iterator<Item = Bytes>) -> bool {
        let mut queue = lock(&self.outbound);
        let before = queue.len();
        queue.extend(chunks);
        let added = queue.len() - before;
        self.in_flight.fetch_add(added, Ordering::AcqRel) == 0
    }

    pub(super) async fn wait_drained(&self) {
        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn mark_drained(&self) {
        self.in_flight.store(0, Ordering::Release);
        self.drained.notify_waiters();
    }

    async fn write(&self, chunk: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        select! {
            biased;

            () = self.token.cancelled() => Err(io::ErrorKind::NotConnected.into()),
            res = async {
                writer.write_all(chunk).await?;
                writer.flush().await
            } => res,
        }
    }
}

impl Session {
    pub(super) fn notify_connect(self: &Arc<Self>, binding: &Binding) {
        let chain = &binding.handlers.chain;
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| chain.notify_connect(self))) {
            self.report_exception(
                ExceptionSource::Callback,
                format!("middleware connect hook panicked: {}", format_panic(panic.as_ref())),
            );
        }
        let hooks = &binding.handlers.hooks;
        hooks.notify(hooks.on_connected.as_ref(), self);
    }

    pub(super) async fn receive_loop(self: Arc<Self>, binding: Arc<Binding>, mut reader: BoxedReader) {
        let mut chunk = vec![0u8; self.config.io_buffer_size.max(1)];
        loop {
            let read = select! {
                biased;

                () = binding.token.cancelled() => break,
                res = reader.read(&mut chunk) => res,
            };
            match read {
                Ok(0) => {
                    debug!("peer closed connection: session={}", binding.id);
                    break;
                }
                Ok(n) => {
                    let received = &chunk[..n];
                    let outcome =
                        std::panic::catch_unwind(AssertUnwindSafe(|| self.process_inbound(&binding, received)));
                    let failure = match outcome {
                        Ok(Ok(())) => continue,
                        Ok(Err(e)) => e.to_string(),
                        Err(panic) => format!("receive pipeline panicked: {}", format_panic(panic.as_ref())),
                    };
                    binding.handlers.hooks.report(&ExceptionEvent {
                        session: Some(binding.id),
                        remote: binding.remote,
                        source: ExceptionSource::Receive,
                        message: failure,
                    });
                    break;
                }
                Err(e) => {
                    debug!("socket read failed: session={}, error={e}", binding.id);
                    break;
                }
            }
        }
        self.finalize(&binding).await;
    }

    pub(super) fn process_inbound(
        self: &Arc<Self>,
        binding: &Binding,
        received: &[u8],
    ) -> Result<(), MiddlewareError> {
        let mut buffer = lock(&self.buffer);
        // A rebind resets the buffer under this lock, and only after the old
        // binding was cancelled.
        if binding.token.is_cancelled() {
            debug!("dropping bytes read after teardown: session={}", binding.id);
            return Ok(());
        }
        let limit = self.config.max_buffered;
        if buffer.len() + received.len() > limit {
            return Err(MiddlewareError::BufferLimit { limit });
        }
        buffer.add(received);
        binding.handlers.chain.run(self, &mut buffer)
    }

    pub(super) async fn drain(self: Arc<Self>, binding: Arc<Binding>) {
        loop {
            let next = lock(&binding.outbound).pop_front();
            let Some(chunk) = next else {
                binding.mark_drained();
                return;
            };
            if let Err(e) = binding.write(&chunk).await {
                debug!("socket write failed: session={}, error={e}", binding.id);
                lock(&binding.outbound).clear();
                binding.mark_drained();
                self.finalize(&binding).await;
                return;
            }
            metrics::inc_frames(self.protocol().as_str(), metrics::Direction::Outbound);
            // Saturating: a concurrent finalize may already have zeroed the count.
            let previous = binding
                .in_flight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
                .unwrap_or_else(|n| n);
            if previous <= 1 {
                binding.drained.notify_waiters();
                return;
            }
        }
    }

    /// Tear the binding down exactly once and release the session.
    pub(super) async fn finalize(self: &Arc<Self>, binding: &Arc<Binding>) {
        if binding.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.store(CLOSING, Ordering::Release);
        binding.token.cancel();
        lock(&binding.outbound).clear();
        binding.mark_drained();
        let writer = binding.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            debug!("socket shutdown failed: session={}, error={e}", binding.id);
        }
        metrics::dec_sessions();
        debug!(
            "session disconnected: session={}, remote={:?}",
            binding.id, binding.remote
        );

        let chain = &binding.handlers.chain;
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| chain.notify_disconnect(self))) {
            binding.handlers.hooks.report(&ExceptionEvent {
                session: Some(binding.id),
                remote: binding.remote,
                source: ExceptionSource::Callback,
                message: format!("middleware disconnect hook panicked: {}", format_panic(panic.as_ref())),
            });
        }
        let hooks = &binding.handlers.hooks;
        hooks.notify(hooks.on_disconnected.as_ref(), self);

        {
            let mut slot = self.binding.write().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, binding)) {
                *slot = None;
            }
        }
        self.state.store(UNBOUND, Ordering::Release);
        if let Some(release) = &binding.handlers.on_release {
            hooks.notify(Some(release), self);
        }
    }
}
