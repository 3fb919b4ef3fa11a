//! Parameter blocks carried in Fast request bodies.
//!
//! A body is a concatenation of `{i32 length, bytes}` items in big-endian
//! order, one per handler argument. Each item holds one value produced by the
//! peer's [`Serializer`].

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use super::{DispatchError, FastError};
use crate::serializer::{Serializer, SerializerError};

/// Concatenate `params` into a length-prefixed parameter block.
///
/// # Errors
///
/// Returns [`FastError::BodyTooLarge`] when an item exceeds `i32::MAX` bytes.
///
/// # Examples
///
/// ```
/// use sockframe::fast::encode_params;
///
/// let body = encode_params(&[&b"abcd"[..]]).expect("small params");
/// assert_eq!(body.as_ref(), &[0, 0, 0, 4, b'a', b'b', b'c', b'd']);
/// ```
pub fn encode_params<P: AsRef<[u8]>>(params: &[P]) -> Result<Bytes, FastError> {
    let size = params.iter().map(|p| 4 + p.as_ref().len()).sum();
    let mut out = Vec::with_capacity(size);
    for param in params {
        let param = param.as_ref();
        let len = i32::try_from(param.len()).map_err(|_| FastError::BodyTooLarge(param.len()))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(param);
    }
    Ok(Bytes::from(out))
}

/// Split a parameter block into its items without copying.
///
/// # Errors
///
/// Returns [`FastError::MalformedParams`] when a length prefix is negative or
/// runs past the end of `body`.
pub fn decode_params(body: &Bytes) -> Result<Vec<Bytes>, FastError> {
    let mut items = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        let Some(prefix) = body.get(offset..offset + 4) else {
            return Err(FastError::MalformedParams("truncated length prefix"));
        };
        let mut raw = [0u8; 4];
        raw.copy_from_slice(prefix);
        let len = usize::try_from(i32::from_be_bytes(raw))
            .map_err(|_| FastError::MalformedParams("negative parameter length"))?;
        let start = offset + 4;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= body.len())
            .ok_or(FastError::MalformedParams("parameter runs past end of body"))?;
        items.push(body.slice(start..end));
        offset = end;
    }
    Ok(items)
}

/// Values that can be sent as a Fast parameter list.
pub trait IntoParams {
    /// Serialize each argument with `serializer`.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error for the first argument that fails.
    fn into_params<S: Serializer>(self, serializer: &S) -> Result<Vec<Vec<u8>>, SerializerError>;
}

/// Values that can be decoded from a Fast parameter list.
pub trait FromParams: Sized {
    /// Deserialize one value per parameter item.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::BadArguments`] when the item count does not
    /// match or an item fails to deserialize.
    fn from_params<S: Serializer>(items: &[Bytes], serializer: &S) -> Result<Self, DispatchError>;
}

impl IntoParams for () {
    fn into_params<S: Serializer>(self, _serializer: &S) -> Result<Vec<Vec<u8>>, SerializerError> {
        Ok(Vec::new())
    }
}

impl FromParams for () {
    fn from_params<S: Serializer>(items: &[Bytes], _serializer: &S) -> Result<Self, DispatchError> {
        arity(items, 0)
    }
}

fn arity(items: &[Bytes], expected: usize) -> Result<(), DispatchError> {
    if items.len() == expected {
        Ok(())
    } else {
        Err(DispatchError::BadArguments(format!(
            "expected {expected} parameters, got {}",
            items.len()
        )))
    }
}

fn decode_item<T, S>(items: &[Bytes], index: usize, serializer: &S) -> Result<T, DispatchError>
where
    T: DeserializeOwned,
    S: Serializer,
{
    let item = items
        .get(index)
        .ok_or_else(|| DispatchError::BadArguments(format!("missing parameter {index}")))?;
    serializer
        .deserialize(item)
        .map_err(|e| DispatchError::BadArguments(format!("parameter {index}: {e}")))
}

macro_rules! tuple_params {
    ($len:expr; $($name:ident : $index:tt),+) => {
        impl<$($name),+> IntoParams for ($($name,)+)
        where
            $($name: Serialize,)+
        {
            fn into_params<S: Serializer>(
                self,
                serializer: &S,
            ) -> Result<Vec<Vec<u8>>, SerializerError> {
                Ok(vec![$(serializer.serialize(&self.$index)?),+])
            }
        }

        impl<$($name),+> FromParams for ($($name,)+)
        where
            $($name: DeserializeOwned,)+
        {
            fn from_params<S: Serializer>(
                items: &[Bytes],
                serializer: &S,
            ) -> Result<Self, DispatchError> {
                arity(items, $len)?;
                Ok(($(decode_item::<$name, S>(items, $index, serializer)?,)+))
            }
        }
    };
}

tuple_params!(1; A: 0);
tuple_params!(2; A: 0, B: 1);
tuple_params!(3; A: 0, B: 1, C: 2);
tuple_params!(4; A: 0, B: 1, C: 2, D: 3);
