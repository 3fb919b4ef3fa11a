//! Lifecycle and exception hooks attached to sessions.
//!
//! [`SessionHooks`] collects optional application callbacks invoked when a
//! session connects, disconnects or hits an error. Every failure caught at a
//! task or callback boundary is funnelled through [`SessionHooks::report`],
//! which logs it, counts it and forwards an [`ExceptionEvent`] to the
//! application's exception hook.

use std::{fmt, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use crate::{
    metrics,
    panic::format_panic,
    session::{Session, SessionId},
};

/// Callback receiving a session.
pub type SessionCallback = Arc<dyn Fn(&Arc<Session>) + Send + Sync>;

/// Callback receiving reported failures.
pub type ExceptionHook = Arc<dyn Fn(&ExceptionEvent) + Send + Sync>;

/// Stage at which a failure was caught.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionSource {
    /// Parsing or middleware processing of received bytes.
    Receive,
    /// Writing queued bytes to the socket.
    Send,
    /// Application handler invoked for a request or message.
    Handler,
    /// Accepting or binding a new connection.
    Accept,
    /// A lifecycle callback.
    Callback,
}

impl ExceptionSource {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Send => "send",
            Self::Handler => "handler",
            Self::Accept => "accept",
            Self::Callback => "callback",
        }
    }
}

/// Failure surfaced to the exception hook.
#[derive(Clone, Debug)]
pub struct ExceptionEvent {
    /// Session the failure belongs to, if any.
    pub session: Option<SessionId>,
    /// Remote address of that session, if known.
    pub remote: Option<SocketAddr>,
    /// Where the failure was caught.
    pub source: ExceptionSource,
    /// Rendered error or panic message.
    pub message: String,
}

/// Optional application callbacks for session lifecycle events.
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub(crate) on_connected: Option<SessionCallback>,
    pub(crate) on_disconnected: Option<SessionCallback>,
    pub(crate) on_exception: Option<ExceptionHook>,
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_exception", &self.on_exception.is_some())
            .finish()
    }
}

impl SessionHooks {
    /// Run `f` after a session binds and its protocol stages are initialised.
    #[must_use]
    pub fn on_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Session>) + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Run `f` once per binding after the socket has been shut down.
    #[must_use]
    pub fn on_disconnected<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Session>) + Send + Sync + 'static,
    {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    /// Receive every failure reported by sessions using these hooks.
    #[must_use]
    pub fn on_exception<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExceptionEvent) + Send + Sync + 'static,
    {
        self.on_exception = Some(Arc::new(f));
        self
    }

    /// Log, count and forward a failure.
    pub fn report(&self, event: &ExceptionEvent) {
        metrics::inc_errors(event.source.as_str());
        // Emit via both `log` and `tracing` for consumers capturing either.
        log::error!(
            "session failure: source={}, session={:?}, remote={:?}, error={}",
            event.source.as_str(),
            event.session,
            event.remote,
            event.message
        );
        tracing::error!(
            source = event.source.as_str(),
            session = ?event.session,
            remote = ?event.remote,
            error = %event.message,
            "session failure"
        );
        if let Some(hook) = &self.on_exception
            && let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| hook(event)))
        {
            log::error!("exception hook panicked: panic={}", format_panic(panic.as_ref()));
        }
    }

    pub(crate) fn notify(&self, callback: Option<&SessionCallback>, session: &Arc<Session>) {
        let Some(callback) = callback else { return };
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(session))) {
            self.report(&ExceptionEvent {
                session: Some(session.id()),
                remote: session.remote_addr(),
                source: ExceptionSource::Callback,
                message: format!("lifecycle callback panicked: {}", format_panic(panic.as_ref())),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tracing_test::traced_test;

    use super::*;

    #[test]
    #[traced_test]
    fn report_reaches_hook_and_log() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hooks = SessionHooks::default().on_exception(move |event| {
            sink.lock().expect("lock").push(event.message.clone());
        });
        hooks.report(&ExceptionEvent {
            session: None,
            remote: None,
            source: ExceptionSource::Handler,
            message: "boom".into(),
        });
        assert_eq!(seen.lock().expect("lock").as_slice(), ["boom".to_string()]);
        assert!(logs_contain("session failure"));
    }

    #[test]
    fn panicking_hook_is_contained() {
        let hooks = SessionHooks::default().on_exception(|_| panic!("hook exploded"));
        hooks.report(&ExceptionEvent {
            session: None,
            remote: None,
            source: ExceptionSource::Receive,
            message: "bad frame".into(),
        });
    }
}
