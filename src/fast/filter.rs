//! Cross-cutting hooks run around Fast handlers.
//!
//! Filters are registered on the router with a [`FilterScope`] and an explicit
//! `order`. For each route the applicable filters are sorted once at build
//! time: global filters first, then filters scoped to the route's service type,
//! then filters scoped to the command itself, each group by ascending order.

use std::{any::TypeId, fmt, sync::Arc};

use bytes::Bytes;

use super::{DispatchError, FastContext};

/// Where a filter applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterScope {
    /// Every route.
    Global,
    /// Routes backed by the service type with this id.
    Service(TypeId),
    /// The route for one command.
    Method(i32),
}

impl FilterScope {
    /// Scope covering routes backed by service `T`.
    #[must_use]
    pub fn service<T: 'static>() -> Self { Self::Service(TypeId::of::<T>()) }

    const fn rank(self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Service(_) => 1,
            Self::Method(_) => 2,
        }
    }

    fn applies_to(self, command: i32, service: Option<TypeId>) -> bool {
        match self {
            Self::Global => true,
            Self::Service(id) => service == Some(id),
            Self::Method(cmd) => cmd == command,
        }
    }
}

/// Outcome of an exception filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExceptionDisposition {
    /// Let later filters and the default error reply see the failure.
    Unhandled,
    /// Reply with this body instead of an exception packet.
    Handled(Bytes),
}

/// Hook points around a dispatched call.
///
/// Every method has a pass-through default so filters implement only the
/// stages they care about.
pub trait ActionFilter: Send + Sync + 'static {
    /// Identifier used for duplicate detection and diagnostics.
    fn name(&self) -> &'static str;

    /// Whether several instances may share one scope.
    fn allow_multiple(&self) -> bool { false }

    /// Runs first. An error rejects the call before the handler runs.
    ///
    /// # Errors
    ///
    /// Return [`DispatchError::Rejected`] to refuse the call.
    fn on_authorization(&self, _ctx: &FastContext) -> Result<(), DispatchError> { Ok(()) }

    /// Runs after authorization and before the handler.
    ///
    /// # Errors
    ///
    /// An error skips the handler and goes through exception filters.
    fn on_executing(&self, _ctx: &FastContext) -> Result<(), DispatchError> { Ok(()) }

    /// Runs after the handler succeeded, in reverse registration order.
    fn on_executed(&self, _ctx: &FastContext, _result: &Bytes) {}

    /// Runs when any earlier stage failed. Returning
    /// [`ExceptionDisposition::Handled`] stops later exception filters.
    fn on_exception(&self, _ctx: &FastContext, _error: &DispatchError) -> ExceptionDisposition {
        ExceptionDisposition::Unhandled
    }
}

#[derive(Clone)]
pub(super) struct Registration {
    pub(super) scope: FilterScope,
    pub(super) order: i32,
    pub(super) filter: Arc<dyn ActionFilter>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.filter.name())
            .field("scope", &self.scope)
            .field("order", &self.order)
            .finish()
    }
}

/// Reject single-instance filters registered twice in the same scope.
pub(super) fn check_multiplicity(registrations: &[Registration]) -> Result<(), DispatchError> {
    for (index, reg) in registrations.iter().enumerate() {
        if reg.filter.allow_multiple() {
            continue;
        }
        let name = reg.filter.name();
        let clash = registrations[..index]
            .iter()
            .any(|other| other.scope == reg.scope && other.filter.name() == name);
        if clash {
            return Err(DispatchError::DuplicateFilter(name));
        }
    }
    Ok(())
}

/// Filters applying to one route, in execution order.
pub(super) fn filters_for(
    registrations: &[Registration],
    command: i32,
    service: Option<TypeId>,
) -> Vec<Arc<dyn ActionFilter>> {
    let mut applicable: Vec<&Registration> = registrations
        .iter()
        .filter(|reg| reg.scope.applies_to(command, service))
        .collect();
    applicable.sort_by_key(|reg| (reg.scope.rank(), reg.order));
    applicable
        .into_iter()
        .map(|reg| Arc::clone(&reg.filter))
        .collect()
}
