//! Resolution of service instances for dispatched calls.
//!
//! Routes registered with
//! [`FastRouterBuilder::route_service`](super::FastRouterBuilder::route_service)
//! name a service type. Each call obtains an instance from the router's
//! [`ServiceResolver`] before the handler runs and hands it back through
//! [`ServiceResolver::terminate`] afterwards.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use thiserror::Error;

use crate::extensions::Extensions;

/// Type-erased service instance.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

type ServiceFactory = Arc<dyn Fn() -> Result<ServiceInstance, String> + Send + Sync>;

/// Failure to obtain a service.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Nothing is registered for the requested type.
    #[error("no service registered for {type_name}")]
    NotRegistered {
        /// Name of the requested type.
        type_name: &'static str,
    },
    /// The registered factory failed.
    #[error("failed to create {type_name}: {reason}")]
    Failed {
        /// Name of the requested type.
        type_name: &'static str,
        /// Factory error message.
        reason: String,
    },
}

/// Supplies service instances to the dispatcher.
pub trait ServiceResolver: Send + Sync + 'static {
    /// Obtain an instance of the type identified by `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] when no instance can be produced; the caller
    /// receives it as an exception reply.
    fn get_service(&self, id: TypeId, type_name: &'static str) -> Result<ServiceInstance, ResolveError>;

    /// Release an instance obtained from [`get_service`](Self::get_service).
    fn terminate(&self, _instance: ServiceInstance) {}
}

/// Resolver backed by registered singletons and per-call factories.
///
/// # Examples
///
/// ```
/// use std::any::TypeId;
/// use std::sync::Arc;
///
/// use sockframe::fast::{ServiceResolver, StaticResolver};
///
/// struct Greeter;
///
/// let resolver = StaticResolver::default().singleton(Arc::new(Greeter));
/// assert!(resolver.get_service(TypeId::of::<Greeter>(), "Greeter").is_ok());
/// ```
#[derive(Clone, Default)]
pub struct StaticResolver {
    singletons: Extensions,
    factories: HashMap<TypeId, ServiceFactory>,
}

impl fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticResolver")
            .field("singletons", &self.singletons)
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl StaticResolver {
    /// Share `service` with every call.
    #[must_use]
    pub fn singleton<T>(mut self, service: Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.singletons.insert(service);
        self
    }

    /// Build a fresh `T` for each call. Factories win over singletons.
    #[must_use]
    pub fn factory<T, F, E>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let factory: ServiceFactory = Arc::new(move || {
            factory()
                .map(|service| Arc::new(service) as ServiceInstance)
                .map_err(|e| e.to_string())
        });
        self.factories.insert(TypeId::of::<T>(), factory);
        self
    }
}

impl ServiceResolver for StaticResolver {
    fn get_service(&self, id: TypeId, type_name: &'static str) -> Result<ServiceInstance, ResolveError> {
        if let Some(factory) = self.factories.get(&id) {
            return factory().map_err(|reason| ResolveError::Failed { type_name, reason });
        }
        self.singletons
            .get_by_id(id)
            .ok_or(ResolveError::NotRegistered { type_name })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counter(usize);

    #[test]
    fn factory_builds_per_call() {
        let built = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&built);
        let resolver = StaticResolver::default().factory(move || {
            Ok::<_, String>(Counter(seen.fetch_add(1, Ordering::SeqCst)))
        });
        for expected in 0..2 {
            let instance = resolver
                .get_service(TypeId::of::<Counter>(), "Counter")
                .expect("factory registered");
            let counter = instance.downcast::<Counter>().expect("factory output type");
            assert_eq!(counter.0, expected);
        }
    }

    #[test]
    fn failing_factory_reports_reason() {
        let resolver = StaticResolver::default().factory(|| Err::<Counter, _>("pool exhausted"));
        let err = resolver
            .get_service(TypeId::of::<Counter>(), "Counter")
            .expect_err("factory fails");
        assert_eq!(err.to_string(), "failed to create Counter: pool exhausted");
    }

    #[test]
    fn unregistered_type_is_named() {
        let err = StaticResolver::default()
            .get_service(TypeId::of::<Counter>(), "Counter")
            .expect_err("nothing registered");
        assert!(matches!(err, ResolveError::NotRegistered { type_name: "Counter" }));
    }
}
