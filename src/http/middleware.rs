use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use log::debug;

use super::{DEFAULT_MAX_BODY, DEFAULT_MAX_HEAD, HttpRequest, HttpResponse};
use crate::{
    byte_buffer::ByteBuffer,
    hooks::ExceptionSource,
    metrics,
    middleware::{Middleware, MiddlewareError, Next},
    panic::format_panic,
    session::{Protocol, Session},
};

/// Application code answering plain HTTP requests.
///
/// Handlers run inline on the receive path, so they must not block.
pub trait HttpHandler: Send + Sync + 'static {
    /// Produce the response for `request`.
    fn handle(&self, session: &Arc<Session>, request: &HttpRequest) -> HttpResponse;
}

impl<F> HttpHandler for F
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    fn handle(&self, _session: &Arc<Session>, request: &HttpRequest) -> HttpResponse { self(request) }
}

/// Handler answering every request with `404 Not Found`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotFound;

impl HttpHandler for NotFound {
    fn handle(&self, _session: &Arc<Session>, _request: &HttpRequest) -> HttpResponse { HttpResponse::not_found() }
}

/// Receive stage serving plain HTTP/1.x requests.
///
/// Pipelined requests are answered in order. The connection is closed after
/// the response when the request does not ask to keep it alive, and after a
/// `400 Bad Request` when the request is malformed.
pub struct HttpMiddleware {
    handler: Arc<dyn HttpHandler>,
    max_head: usize,
    max_body: usize,
}

impl fmt::Debug for HttpMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMiddleware")
            .field("max_head", &self.max_head)
            .field("max_body", &self.max_body)
            .finish_non_exhaustive()
    }
}

impl Default for HttpMiddleware {
    fn default() -> Self { Self::new(NotFound) }
}

impl HttpMiddleware {
    /// Serve requests with `handler`.
    #[must_use]
    pub fn new<H: HttpHandler>(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            max_head: DEFAULT_MAX_HEAD,
            max_body: DEFAULT_MAX_BODY,
        }
    }

    /// Override the head and body ceilings.
    #[must_use]
    pub fn limits(mut self, max_head: usize, max_body: usize) -> Self {
        self.max_head = max_head;
        self.max_body = max_body;
        self
    }

    fn respond(&self, session: &Arc<Session>, request: &HttpRequest) -> HttpResponse {
        std::panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(session, request))).unwrap_or_else(
            |panic| {
                session.report_exception(
                    ExceptionSource::Handler,
                    format!("http handler panicked: {}", format_panic(panic.as_ref())),
                );
                HttpResponse::new(500)
            },
        )
    }
}

impl Middleware for HttpMiddleware {
    fn on_received(
        &self,
        session: &Arc<Session>,
        buffer: &mut ByteBuffer,
        next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        if !matches!(session.protocol(), Protocol::Unknown | Protocol::Http) {
            return next.run(session, buffer);
        }
        while session.is_connected() {
            let parsed = HttpRequest::parse_with_limits(buffer.as_slice(), self.max_head, self.max_body);
            let (request, used) = match parsed {
                Ok(Some(parsed)) => parsed,
                Ok(None) => return Ok(()),
                Err(e) => {
                    session.report_exception(ExceptionSource::Receive, format!("bad http request: {e}"));
                    buffer.clear();
                    send(session, &HttpResponse::bad_request(&e.to_string()));
                    session.begin_close(true);
                    return Ok(());
                }
            };
            buffer.remove(used).map_err(|e| MiddlewareError::Other(Box::new(e)))?;
            session.set_protocol(Protocol::Http);
            metrics::inc_frames(Protocol::Http.as_str(), metrics::Direction::Inbound);
            debug!(
                "http request: session={}, method={}, path={}",
                session.id(),
                request.method,
                request.path
            );

            let response = self.respond(session, &request);
            send(session, &response);
            if !request.keep_alive() {
                buffer.clear();
                session.begin_close(true);
                return Ok(());
            }
        }
        buffer.clear();
        Ok(())
    }
}

fn send(session: &Arc<Session>, response: &HttpResponse) {
    if let Err(e) = session.send(&response.to_bytes()) {
        debug!("failed to send http response: session={}, error={e}", session.id());
    }
}
