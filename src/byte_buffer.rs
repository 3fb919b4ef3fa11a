//! Growable byte accumulator used by the receive pipeline and packet encoders.
//!
//! A [`ByteBuffer`] owns a contiguous backing store whose valid region always
//! starts at offset zero. Incoming socket bytes are appended to the tail,
//! parsers inspect the front with typed reads, and fully-decoded messages are
//! discarded with [`ByteBuffer::remove`]. A read position supports sequential
//! decoding for callers that prefer cursor-style access.

use thiserror::Error;

use crate::byte_order::Endianness;

/// Capacity allocated by [`ByteBuffer::new`].
pub const DEFAULT_CAPACITY: usize = 1024;

/// Errors raised by [`ByteBuffer`] accessors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ByteBufferError {
    /// The requested range extends past the valid region.
    #[error("range {offset}..{offset}+{len} exceeds buffered length {available}")]
    OutOfRange {
        /// Start of the requested range.
        offset: usize,
        /// Requested number of bytes.
        len: usize,
        /// Number of valid bytes currently held.
        available: usize,
    },
}

/// Contiguous, growable byte store with typed access.
///
/// # Examples
///
/// ```
/// use sockframe::byte_buffer::ByteBuffer;
///
/// let mut buf = ByteBuffer::new();
/// buf.add_u32(7);
/// buf.add(b"tail");
/// assert_eq!(buf.read_u32(0).expect("u32 present"), 7);
/// buf.remove(4).expect("prefix present");
/// assert_eq!(buf.as_slice(), b"tail");
/// ```
#[derive(Clone, Debug)]
pub struct ByteBuffer {
    data: Vec<u8>,
    len: usize,
    position: usize,
    endianness: Endianness,
}

impl Default for ByteBuffer {
    fn default() -> Self { Self::new() }
}

macro_rules! typed_access {
    ($($add:ident, $read:ident, $next:ident, $encode:ident, $decode:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Append a `", stringify!($ty), "` using the configured byte order.")]
            pub fn $add(&mut self, value: $ty) {
                let bytes = self.endianness.$encode(value);
                self.add(&bytes);
            }

            #[doc = concat!("Read a `", stringify!($ty), "` at `offset` without consuming it.")]
            ///
            /// # Errors
            ///
            /// Returns [`ByteBufferError::OutOfRange`] if fewer bytes are buffered.
            pub fn $read(&self, offset: usize) -> Result<$ty, ByteBufferError> {
                let mut raw = [0u8; size_of::<$ty>()];
                let len = raw.len();
                raw.copy_from_slice(self.slice(offset, len)?);
                Ok(self.endianness.$decode(raw))
            }

            #[doc = concat!("Read a `", stringify!($ty), "` at the read position and advance it.")]
            ///
            /// # Errors
            ///
            /// Returns [`ByteBufferError::OutOfRange`] if fewer bytes remain.
            pub fn $next(&mut self) -> Result<$ty, ByteBufferError> {
                let value = self.$read(self.position)?;
                self.position += size_of::<$ty>();
                Ok(value)
            }
        )*
    };
}

impl ByteBuffer {
    /// Create an empty buffer with [`DEFAULT_CAPACITY`] bytes reserved.
    #[must_use]
    pub fn new() -> Self { Self::with_capacity(DEFAULT_CAPACITY) }

    /// Create an empty buffer with `capacity` bytes reserved.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
            position: 0,
            endianness: Endianness::default(),
        }
    }

    /// Use `endianness` for all subsequent typed reads and writes.
    #[must_use]
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Byte order used by typed accessors.
    #[must_use]
    pub const fn endianness(&self) -> Endianness { self.endianness }

    /// Number of valid bytes held.
    #[must_use]
    pub const fn len(&self) -> usize { self.len }

    /// Returns `true` when no bytes are buffered.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.len == 0 }

    /// Size of the backing store.
    #[must_use]
    pub fn capacity(&self) -> usize { self.data.len() }

    /// View of the valid region.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.data[..self.len] }

    /// Current read position used by the sequential readers.
    #[must_use]
    pub const fn position(&self) -> usize { self.position }

    /// Move the read position to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`ByteBufferError::OutOfRange`] if `position` lies beyond the
    /// valid region.
    pub fn seek(&mut self, position: usize) -> Result<(), ByteBufferError> {
        if position > self.len {
            return Err(self.out_of_range(position, 0));
        }
        self.position = position;
        Ok(())
    }

    /// Append `bytes` to the tail, growing the backing store by doubling.
    ///
    /// Appending an empty slice is a no-op.
    pub fn add(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let required = self.len + bytes.len();
        if required > self.data.len() {
            let mut capacity = self.data.len().max(1);
            while capacity < required {
                capacity = capacity.saturating_mul(2);
            }
            self.data.resize(capacity, 0);
        }
        self.data[self.len..required].copy_from_slice(bytes);
        self.len = required;
    }

    /// Append a single byte.
    pub fn add_u8(&mut self, value: u8) { self.add(&[value]); }

    typed_access! {
        add_u16, read_u16, next_u16, encode_u16, decode_u16 => u16;
        add_i16, read_i16, next_i16, encode_i16, decode_i16 => i16;
        add_u32, read_u32, next_u32, encode_u32, decode_u32 => u32;
        add_i32, read_i32, next_i32, encode_i32, decode_i32 => i32;
        add_u64, read_u64, next_u64, encode_u64, decode_u64 => u64;
        add_i64, read_i64, next_i64, encode_i64, decode_i64 => i64;
    }

    /// Read the byte at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ByteBufferError::OutOfRange`] if `offset` is not buffered.
    pub fn read_u8(&self, offset: usize) -> Result<u8, ByteBufferError> {
        self.slice(offset, 1).map(|bytes| bytes[0])
    }

    /// Borrow `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ByteBufferError::OutOfRange`] if the range is not buffered.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], ByteBufferError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(&self.data[offset..end]),
            _ => Err(self.out_of_range(offset, len)),
        }
    }

    /// Copy the valid region into a fresh vector.
    #[must_use]
    pub fn to_array(&self) -> Vec<u8> { self.as_slice().to_vec() }

    /// Consume the buffer, returning the valid region without copying.
    #[must_use]
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.truncate(self.len);
        self.data
    }

    /// Copy `len` bytes starting at `offset` into a fresh vector.
    ///
    /// # Errors
    ///
    /// Returns [`ByteBufferError::OutOfRange`] if the range is not buffered.
    pub fn to_array_range(&self, offset: usize, len: usize) -> Result<Vec<u8>, ByteBufferError> {
        self.slice(offset, len).map(<[u8]>::to_vec)
    }

    /// Discard the first `count` bytes, shifting the remainder to offset zero.
    ///
    /// The read position moves back by `count`, saturating at zero.
    ///
    /// # Errors
    ///
    /// Returns [`ByteBufferError::OutOfRange`] if fewer than `count` bytes are
    /// buffered. The buffer is left untouched in that case.
    pub fn remove(&mut self, count: usize) -> Result<(), ByteBufferError> {
        if count > self.len {
            return Err(self.out_of_range(0, count));
        }
        self.data.copy_within(count..self.len, 0);
        self.len -= count;
        self.position = self.position.saturating_sub(count);
        Ok(())
    }

    /// Drop every buffered byte and rewind the read position. Capacity is kept.
    pub fn clear(&mut self) {
        self.len = 0;
        self.position = 0;
    }

    fn out_of_range(&self, offset: usize, len: usize) -> ByteBufferError {
        ByteBufferError::OutOfRange {
            offset,
            len,
            available: self.len,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[test]
    fn growth_preserves_contents() {
        let mut buf = ByteBuffer::with_capacity(2);
        buf.add(b"abc");
        buf.add(b"defgh");
        assert!(buf.capacity() >= 8);
        assert_eq!(buf.as_slice(), b"abcdefgh");
    }

    #[test]
    fn zero_capacity_buffer_still_grows() {
        let mut buf = ByteBuffer::with_capacity(0);
        buf.add(b"x");
        assert_eq!(buf.to_array(), b"x".to_vec());
    }

    #[test]
    fn empty_add_is_noop() {
        let mut buf = ByteBuffer::new();
        buf.add(&[]);
        assert!(buf.is_empty());
    }

    #[test]
    fn remove_compacts_and_rewinds_position() {
        let mut buf = ByteBuffer::new();
        buf.add(b"0123456789");
        buf.seek(6).expect("seek within range");
        buf.remove(4).expect("remove within range");
        assert_eq!(buf.as_slice(), b"456789");
        assert_eq!(buf.position(), 2);
    }

    #[test]
    fn remove_more_than_buffered_fails_without_mutation() {
        let mut buf = ByteBuffer::new();
        buf.add(b"ab");
        let err = buf.remove(3).expect_err("remove past end must fail");
        assert_eq!(
            err,
            ByteBufferError::OutOfRange {
                offset: 0,
                len: 3,
                available: 2
            }
        );
        assert_eq!(buf.as_slice(), b"ab");
    }

    #[rstest]
    #[case(Endianness::Big)]
    #[case(Endianness::Little)]
    fn typed_values_read_back_at_offsets(#[case] order: Endianness) {
        let mut buf = ByteBuffer::new().with_endianness(order);
        buf.add_i16(-3);
        buf.add_u32(0xDEAD_BEEF);
        buf.add_i64(-42);
        assert_eq!(buf.read_i16(0), Ok(-3));
        assert_eq!(buf.read_u32(2), Ok(0xDEAD_BEEF));
        assert_eq!(buf.read_i64(6), Ok(-42));
    }

    #[test]
    fn sequential_reads_advance_position() {
        let mut buf = ByteBuffer::new();
        buf.add_u16(1);
        buf.add_u64(2);
        assert_eq!(buf.next_u16(), Ok(1));
        assert_eq!(buf.next_u64(), Ok(2));
        assert_eq!(buf.position(), 10);
        assert!(buf.next_u16().is_err());
    }

    #[test]
    fn range_copy_checks_bounds() {
        let mut buf = ByteBuffer::new();
        buf.add(b"hello");
        assert_eq!(buf.to_array_range(1, 3), Ok(b"ell".to_vec()));
        assert!(buf.to_array_range(3, 3).is_err());
        assert!(buf.slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.add(&[1; 40]);
        let capacity = buf.capacity();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
    }

    proptest! {
        #[test]
        fn appended_chunks_concatenate(chunks in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..64), 0..16)
        ) {
            let mut buf = ByteBuffer::with_capacity(4);
            for chunk in &chunks {
                buf.add(chunk);
            }
            let expected: Vec<u8> = chunks.concat();
            prop_assert_eq!(buf.as_slice(), expected.as_slice());
        }
    }
}
