//! Type-keyed storage for per-session protocol state and shared services.
//!
//! `Extensions` stores one value per concrete type, keyed by `TypeId`, inside
//! an `Arc<dyn Any + Send + Sync>` so lookups hand out cheap shared handles.
//! Sessions use it to attach protocol peers after a handshake, and
//! [`StaticResolver`](crate::fast::StaticResolver) uses it to hold services.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

/// Map from concrete type to a shared instance of that type.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use sockframe::extensions::Extensions;
///
/// let mut ext = Extensions::default();
/// ext.insert(Arc::new(42u32));
/// assert_eq!(ext.get::<u32>().as_deref(), Some(&42));
/// ```
#[derive(Clone, Default)]
pub struct Extensions {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.values.len())
            .finish()
    }
}

impl Extensions {
    /// Store `value`, replacing any existing value of type `T`.
    pub fn insert<T>(&mut self, value: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        self.values.insert(TypeId::of::<T>(), value);
    }

    /// Shared handle to the stored `T`, if any.
    #[must_use]
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.get_by_id(TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Type-erased lookup used when only the `TypeId` is known.
    #[must_use]
    pub fn get_by_id(&self, id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.values.get(&id).cloned()
    }

    /// Return the stored `T`, inserting the value produced by `init` first if
    /// none exists.
    pub fn get_or_insert_with<T, F>(&mut self, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Arc<T>,
    {
        if let Some(existing) = self.get::<T>() {
            return existing;
        }
        let value = init();
        self.insert(Arc::clone(&value));
        value
    }

    /// Remove and return the stored `T`.
    pub fn remove<T>(&mut self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Drop every stored value.
    pub fn clear(&mut self) { self.values.clear(); }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_runs_init_once() {
        let mut ext = Extensions::default();
        let first = ext.get_or_insert_with(|| Arc::new(String::from("a")));
        let second = ext.get_or_insert_with(|| Arc::new(String::from("b")));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.as_str(), "a");
    }

    #[test]
    fn values_are_keyed_by_type() {
        let mut ext = Extensions::default();
        ext.insert(Arc::new(1u8));
        ext.insert(Arc::new(2u16));
        assert_eq!(ext.remove::<u8>().as_deref(), Some(&1));
        assert!(ext.get::<u8>().is_none());
        assert_eq!(ext.get::<u16>().as_deref(), Some(&2));
        ext.clear();
        assert!(ext.is_empty());
    }
}
