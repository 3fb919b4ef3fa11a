//! Case-insensitive per-session user data.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;

/// Value stored in a [`TagBag`].
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes.
    Bytes(Bytes),
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self { Self::Bool(value) }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self { Self::Int(value) }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self { Self::Float(value) }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self { Self::Text(value.to_owned()) }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self { Self::Text(value) }
}

impl From<Bytes> for TagValue {
    fn from(value: Bytes) -> Self { Self::Bytes(value) }
}

/// Thread-safe string-keyed tag store. Keys compare case-insensitively.
///
/// # Examples
///
/// ```
/// use sockframe::session::TagBag;
///
/// let tags = TagBag::default();
/// tags.set("User", "alice");
/// assert_eq!(tags.get_str("user").as_deref(), Some("alice"));
/// ```
#[derive(Debug, Default)]
pub struct TagBag {
    values: Mutex<HashMap<String, TagValue>>,
}

impl TagBag {
    fn values(&self) -> MutexGuard<'_, HashMap<String, TagValue>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn set(&self, key: &str, value: impl Into<TagValue>) -> Option<TagValue> {
        self.values().insert(key.to_lowercase(), value.into())
    }

    /// Fetch a copy of the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<TagValue> { self.values().get(&key.to_lowercase()).cloned() }

    /// Fetch `key` as text if it holds [`TagValue::Text`].
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            TagValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Fetch `key` as an integer if it holds [`TagValue::Int`].
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            TagValue::Int(value) => Some(value),
            _ => None,
        }
    }

    /// Remove and return the value stored under `key`.
    pub fn remove(&self, key: &str) -> Option<TagValue> { self.values().remove(&key.to_lowercase()) }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool { self.values().contains_key(&key.to_lowercase()) }

    /// Number of stored tags.
    #[must_use]
    pub fn len(&self) -> usize { self.values().len() }

    /// Returns `true` when no tags are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.values().is_empty() }

    /// Remove every tag.
    pub fn clear(&self) { self.values().clear(); }
}
