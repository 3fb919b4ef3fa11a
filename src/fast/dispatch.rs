//! Command routing for inbound Fast requests.
//!
//! A [`FastRouter`] is an explicit registration table from command id to
//! handler, built once through [`FastRouterBuilder`]. Handlers receive a
//! [`FastContext`] describing the request and, for service routes, an instance
//! obtained from the router's [`ServiceResolver`].

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use bytes::Bytes;
use futures::{
    FutureExt,
    future::{BoxFuture, ready},
};
use serde::Serialize;

use super::{
    DispatchError,
    ExceptionDisposition,
    FastPacket,
    FilterScope,
    FromParams,
    ResolveError,
    ServiceResolver,
    StaticResolver,
    decode_params,
    filter::{ActionFilter, Registration, check_multiplicity, filters_for},
    resolver::ServiceInstance,
};
use crate::{
    panic::format_panic,
    serializer::{BincodeSerializer, Serializer},
    session::{Session, TagBag},
};

type Handler =
    Arc<dyn Fn(FastContext, Option<ServiceInstance>) -> BoxFuture<'static, Result<Bytes, DispatchError>> + Send + Sync>;

/// Request being dispatched, passed explicitly to handlers and filters.
#[derive(Clone, Debug)]
pub struct FastContext {
    session: Arc<Session>,
    command: i32,
    id: i64,
    body: Bytes,
}

impl FastContext {
    /// Context for `packet` received on `session`.
    #[must_use]
    pub fn new(session: Arc<Session>, packet: FastPacket) -> Self {
        Self {
            session,
            command: packet.command,
            id: packet.id,
            body: packet.body,
        }
    }

    /// Session the request arrived on.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> { &self.session }

    /// Requested command.
    #[must_use]
    pub const fn command(&self) -> i32 { self.command }

    /// Correlation id echoed in the reply.
    #[must_use]
    pub const fn id(&self) -> i64 { self.id }

    /// Raw request body.
    #[must_use]
    pub const fn body(&self) -> &Bytes { &self.body }

    /// Request body split into parameter items.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::BadArguments`] if the body is not a valid
    /// parameter block.
    pub fn params(&self) -> Result<Vec<Bytes>, DispatchError> {
        decode_params(&self.body).map_err(|e| DispatchError::BadArguments(e.to_string()))
    }

    /// User data of the calling session.
    #[must_use]
    pub fn tags(&self) -> &TagBag { self.session.tags() }
}

#[derive(Clone, Copy, Debug)]
struct ServiceKey {
    id: TypeId,
    name: &'static str,
}

#[derive(Clone)]
struct Route {
    handler: Handler,
    service: Option<ServiceKey>,
    filters: Vec<Arc<dyn ActionFilter>>,
}

/// Immutable command table shared by every session of a server.
pub struct FastRouter<S = BincodeSerializer> {
    routes: HashMap<i32, Route>,
    resolver: Arc<dyn ServiceResolver>,
    serializer: Arc<S>,
}

impl<S> fmt::Debug for FastRouter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<_> = self.routes.keys().copied().collect();
        commands.sort_unstable();
        f.debug_struct("FastRouter")
            .field("commands", &commands)
            .finish_non_exhaustive()
    }
}

impl FastRouter<BincodeSerializer> {
    /// Start a router using [`BincodeSerializer`].
    #[must_use]
    pub fn builder() -> FastRouterBuilder<BincodeSerializer> { FastRouterBuilder::new(BincodeSerializer) }
}

impl<S: Serializer> FastRouter<S> {
    /// Serializer used for parameters and results.
    #[must_use]
    pub fn serializer(&self) -> &Arc<S> { &self.serializer }

    /// Returns `true` if `command` has a handler.
    #[must_use]
    pub fn has_route(&self, command: i32) -> bool { self.routes.contains_key(&command) }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize { self.routes.len() }

    /// Returns `true` if no commands are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    /// Run the filters and handler for `ctx`.
    ///
    /// Returns the reply body. Panics inside the handler are caught and
    /// reported as [`DispatchError::Panicked`].
    ///
    /// # Errors
    ///
    /// Returns the failure to send back as an exception packet, unless an
    /// exception filter handled it.
    pub async fn dispatch(&self, ctx: FastContext) -> Result<Bytes, DispatchError> {
        let route = self
            .routes
            .get(&ctx.command)
            .ok_or(DispatchError::UnknownCommand(ctx.command))?;
        match self.execute(route, &ctx).await {
            Ok(body) => {
                for filter in route.filters.iter().rev() {
                    filter.on_executed(&ctx, &body);
                }
                Ok(body)
            }
            Err(err) => {
                for filter in &route.filters {
                    if let ExceptionDisposition::Handled(body) = filter.on_exception(&ctx, &err) {
                        return Ok(body);
                    }
                }
                Err(err)
            }
        }
    }

    async fn execute(&self, route: &Route, ctx: &FastContext) -> Result<Bytes, DispatchError> {
        for filter in &route.filters {
            filter.on_authorization(ctx)?;
        }
        for filter in &route.filters {
            filter.on_executing(ctx)?;
        }
        let service = route
            .service
            .map(|key| self.resolver.get_service(key.id, key.name))
            .transpose()?;
        let call = async { (route.handler)(ctx.clone(), service.clone()).await };
        let result = AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(DispatchError::Panicked(format_panic(panic.as_ref()).to_string())));
        if let Some(service) = service {
            self.resolver.terminate(service);
        }
        result
    }
}

/// Builder for [`FastRouter`].
///
/// # Examples
///
/// ```
/// use sockframe::fast::{FastContext, FastRouter};
///
/// let router = FastRouter::builder()
///     .route(5, |_ctx: FastContext, (text,): (String,)| async move {
///         Ok::<_, std::convert::Infallible>(format!("{text}!"))
///     })
///     .build()
///     .expect("unique commands");
/// assert!(router.has_route(5));
/// ```
pub struct FastRouterBuilder<S = BincodeSerializer> {
    routes: Vec<(i32, Route)>,
    filters: Vec<Registration>,
    resolver: Arc<dyn ServiceResolver>,
    serializer: Arc<S>,
}

impl<S: Serializer> FastRouterBuilder<S> {
    /// Start a router that marshals values with `serializer`.
    #[must_use]
    pub fn new(serializer: S) -> Self {
        Self {
            routes: Vec::new(),
            filters: Vec::new(),
            resolver: Arc::new(StaticResolver::default()),
            serializer: Arc::new(serializer),
        }
    }

    /// Register a typed handler for `command`.
    ///
    /// Parameters are decoded into `A`; the returned value is serialized into
    /// the reply body. A handler error is sent back as an exception.
    #[must_use]
    pub fn route<A, R, E, F, Fut>(mut self, command: i32, handler: F) -> Self
    where
        A: FromParams + 'static,
        R: Serialize + 'static,
        E: fmt::Display + 'static,
        F: Fn(FastContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let serializer = Arc::clone(&self.serializer);
        let erased: Handler = Arc::new(move |ctx: FastContext, _service: Option<ServiceInstance>| {
            let args = match decode_args::<A, S>(&ctx, &serializer) {
                Ok(args) => args,
                Err(err) => return ready(Err(err)).boxed(),
            };
            finish(handler(ctx, args), Arc::clone(&serializer))
        });
        self.push_route(command, erased, None);
        self
    }

    /// Register a handler working on raw bodies.
    #[must_use]
    pub fn route_raw<F, Fut>(mut self, command: i32, handler: F) -> Self
    where
        F: Fn(FastContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, DispatchError>> + Send + 'static,
    {
        let erased: Handler =
            Arc::new(move |ctx: FastContext, _service: Option<ServiceInstance>| handler(ctx).boxed());
        self.push_route(command, erased, None);
        self
    }

    /// Register a handler that needs a `Svc` from the resolver.
    ///
    /// The instance is requested before the handler runs and terminated after
    /// it finishes. Filters scoped with [`FilterScope::service::<Svc>()`]
    /// apply to this route.
    #[must_use]
    pub fn route_service<Svc, A, R, E, F, Fut>(mut self, command: i32, handler: F) -> Self
    where
        Svc: Send + Sync + 'static,
        A: FromParams + 'static,
        R: Serialize + 'static,
        E: fmt::Display + 'static,
        F: Fn(Arc<Svc>, FastContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let serializer = Arc::clone(&self.serializer);
        let key = ServiceKey {
            id: TypeId::of::<Svc>(),
            name: type_name::<Svc>(),
        };
        let erased: Handler = Arc::new(move |ctx: FastContext, service: Option<ServiceInstance>| {
            let service = match downcast_service::<Svc>(service, key.name) {
                Ok(service) => service,
                Err(err) => return ready(Err(err)).boxed(),
            };
            let args = match decode_args::<A, S>(&ctx, &serializer) {
                Ok(args) => args,
                Err(err) => return ready(Err(err)).boxed(),
            };
            finish(handler(service, ctx, args), Arc::clone(&serializer))
        });
        self.push_route(command, erased, Some(key));
        self
    }

    /// Register `filter` in `scope`; lower `order` runs first within a scope.
    #[must_use]
    pub fn filter<F: ActionFilter>(mut self, scope: FilterScope, order: i32, filter: F) -> Self {
        self.filters.push(Registration {
            scope,
            order,
            filter: Arc::new(filter),
        });
        self
    }

    /// Use `resolver` for service routes instead of an empty
    /// [`StaticResolver`].
    #[must_use]
    pub fn resolver<R: ServiceResolver>(mut self, resolver: R) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Validate registrations and freeze the table.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateCommand`] if a command has two
    /// handlers, or [`DispatchError::DuplicateFilter`] if a single-instance
    /// filter appears twice in one scope.
    pub fn build(self) -> Result<FastRouter<S>, DispatchError> {
        check_multiplicity(&self.filters)?;
        let mut routes = HashMap::with_capacity(self.routes.len());
        for (command, mut route) in self.routes {
            route.filters = filters_for(&self.filters, command, route.service.map(|key| key.id));
            if routes.insert(command, route).is_some() {
                return Err(DispatchError::DuplicateCommand(command));
            }
        }
        Ok(FastRouter {
            routes,
            resolver: self.resolver,
            serializer: self.serializer,
        })
    }

    fn push_route(&mut self, command: i32, handler: Handler, service: Option<ServiceKey>) {
        self.routes.push((command, Route {
            handler,
            service,
            filters: Vec::new(),
        }));
    }
}

fn decode_args<A: FromParams, S: Serializer>(ctx: &FastContext, serializer: &S) -> Result<A, DispatchError> {
    let items = ctx.params()?;
    A::from_params(&items, serializer)
}

fn downcast_service<Svc>(service: Option<ServiceInstance>, name: &'static str) -> Result<Arc<Svc>, DispatchError>
where
    Svc: Send + Sync + 'static,
{
    service
        .ok_or(ResolveError::NotRegistered { type_name: name })?
        .downcast::<Svc>()
        .map_err(|_| {
            DispatchError::Resolve(ResolveError::Failed {
                type_name: name,
                reason: "resolver returned an instance of another type".into(),
            })
        })
}

fn finish<R, E, Fut, S>(call: Fut, serializer: Arc<S>) -> BoxFuture<'static, Result<Bytes, DispatchError>>
where
    R: Serialize,
    E: fmt::Display,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    S: Serializer,
{
    async move {
        let value = call.await.map_err(|e| DispatchError::Handler(e.to_string()))?;
        serializer
            .serialize(&value)
            .map(Bytes::from)
            .map_err(|e| DispatchError::Serialize(e.to_string()))
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::fast::encode_params;

    #[fixture]
    fn session() -> Arc<Session> { Arc::new(Session::default()) }

    fn request(session: &Arc<Session>, command: i32, params: &[&[u8]]) -> FastContext {
        let body = encode_params(params).expect("encodes");
        FastContext::new(Arc::clone(session), FastPacket::new(command, 1, body))
    }

    fn string_param(text: &str) -> Vec<u8> { BincodeSerializer.serialize(text).expect("serializes") }

    #[derive(Clone)]
    struct Journal {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        reject: bool,
        handle: bool,
    }

    impl Journal {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                reject: false,
                handle: false,
            }
        }

        fn record(&self, stage: &str) { self.log.lock().expect("lock").push(format!("{}:{stage}", self.name)); }
    }

    impl ActionFilter for Journal {
        fn name(&self) -> &'static str { self.name }

        fn on_authorization(&self, _ctx: &FastContext) -> Result<(), DispatchError> {
            self.record("auth");
            if self.reject {
                return Err(DispatchError::Rejected("not allowed".into()));
            }
            Ok(())
        }

        fn on_executing(&self, _ctx: &FastContext) -> Result<(), DispatchError> {
            self.record("executing");
            Ok(())
        }

        fn on_executed(&self, _ctx: &FastContext, _result: &Bytes) { self.record("executed"); }

        fn on_exception(&self, _ctx: &FastContext, _error: &DispatchError) -> ExceptionDisposition {
            self.record("exception");
            if self.handle {
                ExceptionDisposition::Handled(Bytes::from_static(b"fallback"))
            } else {
                ExceptionDisposition::Unhandled
            }
        }
    }

    fn echo_router() -> FastRouterBuilder {
        FastRouter::builder().route(5, |_ctx: FastContext, (text,): (String,)| async move {
            Ok::<_, String>(format!("{text}!"))
        })
    }

    #[rstest]
    #[tokio::test]
    async fn typed_route_replies_with_serialized_result(session: Arc<Session>) {
        let router = echo_router().build().expect("builds");
        let body = router
            .dispatch(request(&session, 5, &[&string_param("abcd")]))
            .await
            .expect("handler succeeds");
        let reply: String = BincodeSerializer.deserialize(&body).expect("decodes");
        assert_eq!(reply, "abcd!");
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_command_is_an_error(session: Arc<Session>) {
        let router = echo_router().build().expect("builds");
        let err = router
            .dispatch(request(&session, 999, &[]))
            .await
            .expect_err("no route");
        assert!(matches!(err, DispatchError::UnknownCommand(999)));
    }

    #[rstest]
    #[tokio::test]
    async fn wrong_arity_is_bad_arguments(session: Arc<Session>) {
        let router = echo_router().build().expect("builds");
        let err = router
            .dispatch(request(&session, 5, &[]))
            .await
            .expect_err("missing parameter");
        assert!(matches!(err, DispatchError::BadArguments(_)));
    }

    #[test]
    fn duplicate_command_fails_build() {
        let err = echo_router()
            .route_raw(5, |_ctx| async { Ok(Bytes::new()) })
            .build()
            .expect_err("command 5 twice");
        assert!(matches!(err, DispatchError::DuplicateCommand(5)));
    }

    #[rstest]
    #[tokio::test]
    async fn filters_wrap_handler_in_precedence_order(session: Arc<Session>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = echo_router()
            .filter(FilterScope::Method(5), 0, Journal::new("method", &log))
            .filter(FilterScope::Global, 0, Journal::new("global", &log))
            .build()
            .expect("builds");
        router
            .dispatch(request(&session, 5, &[&string_param("x")]))
            .await
            .expect("handler succeeds");
        assert_eq!(*log.lock().expect("lock"), [
            "global:auth",
            "method:auth",
            "global:executing",
            "method:executing",
            "method:executed",
            "global:executed",
        ]);
    }

    #[rstest]
    #[tokio::test]
    async fn rejection_skips_handler_and_reaches_exception_filters(session: Arc<Session>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let mut gate = Journal::new("gate", &log);
        gate.reject = true;
        let router = FastRouter::builder()
            .route_raw(1, move |_ctx| {
                *flag.lock().expect("lock") = true;
                async { Ok(Bytes::new()) }
            })
            .filter(FilterScope::Global, 0, gate)
            .build()
            .expect("builds");
        let err = router
            .dispatch(request(&session, 1, &[]))
            .await
            .expect_err("rejected");
        assert!(matches!(err, DispatchError::Rejected(_)));
        assert!(!*called.lock().expect("lock"));
        assert_eq!(*log.lock().expect("lock"), ["gate:auth", "gate:exception"]);
    }

    #[rstest]
    #[tokio::test]
    async fn handled_exception_stops_later_filters(session: Arc<Session>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut first = Journal::new("first", &log);
        first.handle = true;
        let router = FastRouter::builder()
            .route_raw(1, |_ctx| async { Err(DispatchError::Handler("boom".into())) })
            .filter(FilterScope::Global, 0, first)
            .filter(FilterScope::Global, 1, Journal::new("second", &log))
            .build()
            .expect("builds");
        let body = router
            .dispatch(request(&session, 1, &[]))
            .await
            .expect("exception handled");
        assert_eq!(body.as_ref(), b"fallback");
        let log = log.lock().expect("lock");
        assert!(log.contains(&"first:exception".to_string()));
        assert!(!log.contains(&"second:exception".to_string()));
    }

    async fn explode(_ctx: FastContext) -> Result<Bytes, DispatchError> { panic!("handler exploded") }

    #[rstest]
    #[tokio::test]
    async fn handler_panic_becomes_dispatch_error(session: Arc<Session>) {
        let router = FastRouter::builder()
            .route_raw(1, explode)
            .build()
            .expect("builds");
        let err = router
            .dispatch(request(&session, 1, &[]))
            .await
            .expect_err("panic caught");
        assert!(matches!(err, DispatchError::Panicked(msg) if msg == "handler exploded"));
    }

    struct Greeter {
        greeting: &'static str,
    }

    #[rstest]
    #[tokio::test]
    async fn service_route_resolves_instance(session: Arc<Session>) {
        let router = FastRouter::builder()
            .resolver(StaticResolver::default().singleton(Arc::new(Greeter { greeting: "hello" })))
            .route_service(2, |svc: Arc<Greeter>, _ctx, (name,): (String,)| async move {
                Ok::<_, String>(format!("{} {name}", svc.greeting))
            })
            .build()
            .expect("builds");
        let body = router
            .dispatch(request(&session, 2, &[&string_param("bob")]))
            .await
            .expect("resolved");
        let reply: String = BincodeSerializer.deserialize(&body).expect("decodes");
        assert_eq!(reply, "hello bob");
    }

    #[rstest]
    #[tokio::test]
    async fn missing_service_is_resolve_error(session: Arc<Session>) {
        let router = FastRouter::builder()
            .route_service(2, |_svc: Arc<Greeter>, _ctx, (): ()| async { Ok::<_, String>(()) })
            .build()
            .expect("builds");
        let err = router
            .dispatch(request(&session, 2, &[]))
            .await
            .expect_err("nothing registered");
        assert!(matches!(err, DispatchError::Resolve(ResolveError::NotRegistered { .. })));
    }
}
