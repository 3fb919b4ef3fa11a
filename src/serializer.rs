//! Pluggable parameter serialization.
//!
//! The Fast RPC layer only ever needs to turn `serde` values into bytes and
//! back. [`Serializer`] captures that narrow contract; [`BincodeSerializer`]
//! is the default and [`JsonSerializer`] is available for peers that expect
//! text payloads.

use std::error::Error;

use bincode::{
    config,
    serde::{decode_from_slice, encode_to_vec},
};
use serde::{Serialize, de::DeserializeOwned};

/// Boxed error produced by a serializer.
pub type SerializerError = Box<dyn Error + Send + Sync>;

/// Converts `serde` values to and from bytes.
///
/// # Object Safety
///
/// This trait is not object-safe because its methods are generic. Use concrete
/// serializer types as type parameters, as `FastRouter<S>` and `FastPeer<S>`
/// do.
pub trait Serializer: Send + Sync + 'static {
    /// Serialize `value` into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializerError>
    where
        T: Serialize + ?Sized;

    /// Deserialize a value of type `T` from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` do not encode a `T`.
    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, SerializerError>
    where
        T: DeserializeOwned;
}

/// Serializer using `bincode` with its standard configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializerError>
    where
        T: Serialize + ?Sized,
    {
        encode_to_vec(value, config::standard()).map_err(Into::into)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, SerializerError>
    where
        T: DeserializeOwned,
    {
        decode_from_slice(bytes, config::standard())
            .map(|(value, _)| value)
            .map_err(Into::into)
    }
}

/// Serializer producing UTF-8 JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializerError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(Into::into)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, SerializerError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(Into::into)
    }
}
