//! Byte-order selection for typed reads and writes.
//!
//! Both wire protocols shipped with `sockframe` are big-endian on the wire,
//! so [`Endianness::Big`] is the default. Little-endian remains available for
//! custom framings layered on [`ByteBuffer`](crate::byte_buffer::ByteBuffer).

use serde::Deserialize;

/// Byte order applied to multi-byte integer fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Most significant byte first (network order).
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

macro_rules! endian_codec {
    ($($write:ident, $read:ident => $ty:ty;)*) => {
        impl Endianness {
            $(
                #[doc = concat!("Encode a `", stringify!($ty), "` in this byte order.")]
                #[must_use]
                pub const fn $write(self, value: $ty) -> [u8; size_of::<$ty>()] {
                    match self {
                        Self::Big => value.to_be_bytes(),
                        Self::Little => value.to_le_bytes(),
                    }
                }

                #[doc = concat!("Decode a `", stringify!($ty), "` in this byte order.")]
                #[must_use]
                pub const fn $read(self, bytes: [u8; size_of::<$ty>()]) -> $ty {
                    match self {
                        Self::Big => <$ty>::from_be_bytes(bytes),
                        Self::Little => <$ty>::from_le_bytes(bytes),
                    }
                }
            )*
        }
    };
}

endian_codec! {
    encode_u16, decode_u16 => u16;
    encode_i16, decode_i16 => i16;
    encode_u32, decode_u32 => u32;
    encode_i32, decode_i32 => i32;
    encode_u64, decode_u64 => u64;
    encode_i64, decode_i64 => i64;
}
