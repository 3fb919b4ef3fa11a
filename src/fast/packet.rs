//! Fast packet framing.
//!
//! ```text
//! [0:4)   total length, i32, includes these four bytes
//! [4:8)   command, i32
//! [8:16)  correlation id, i64
//! [16]    exception flag, 0 or 1
//! [17:..) body
//! ```
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{FastError, config::DEFAULT_MAX_PACKET_LEN};
use crate::{byte_buffer::ByteBuffer, byte_order::Endianness};

/// Size of the fixed packet header.
pub const HEADER_LEN: usize = 17;

/// One Fast protocol unit: a request, a reply, or an exception reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FastPacket {
    /// Command the packet addresses.
    pub command: i32,
    /// Correlation id pairing requests with replies.
    pub id: i64,
    /// Set when the body carries an error message instead of a result.
    pub is_exception: bool,
    /// Opaque payload.
    pub body: Bytes,
}

impl FastPacket {
    /// Build a regular packet.
    #[must_use]
    pub fn new(command: i32, id: i64, body: impl Into<Bytes>) -> Self {
        Self {
            command,
            id,
            is_exception: false,
            body: body.into(),
        }
    }

    /// Build the reply to this packet, keeping its command and id.
    #[must_use]
    pub fn reply(&self, body: impl Into<Bytes>) -> Self { Self::new(self.command, self.id, body) }

    /// Build an exception packet whose body is `message` as UTF-8.
    #[must_use]
    pub fn exception(command: i32, id: i64, message: &str) -> Self {
        Self {
            command,
            id,
            is_exception: true,
            body: Bytes::copy_from_slice(message.as_bytes()),
        }
    }

    /// Total encoded size, header included.
    #[must_use]
    pub fn encoded_len(&self) -> usize { HEADER_LEN + self.body.len() }

    /// Body decoded as lossy UTF-8, as carried by exception packets.
    #[must_use]
    pub fn error_message(&self) -> String { String::from_utf8_lossy(&self.body).into_owned() }

    /// Encode the packet for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`FastError::BodyTooLarge`] if the total length does not fit in
    /// an `i32`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sockframe::fast::FastPacket;
    ///
    /// let bytes = FastPacket::new(5, 1, &b"hi"[..]).encode().expect("small packet");
    /// assert_eq!(&bytes[..4], &[0, 0, 0, 19]);
    /// ```
    pub fn encode(&self) -> Result<Bytes, FastError> {
        let total = self.total_len()?;
        let mut buf = ByteBuffer::with_capacity(self.encoded_len()).with_endianness(Endianness::Big);
        buf.add_i32(total);
        buf.add_i32(self.command);
        buf.add_i64(self.id);
        buf.add_u8(u8::from(self.is_exception));
        buf.add(&self.body);
        Ok(Bytes::from(buf.into_vec()))
    }

    /// Decode one packet from the front of `buffer`.
    ///
    /// Returns `Ok(None)` and leaves the buffer untouched while the packet is
    /// incomplete. Otherwise removes exactly the packet's bytes, leaving any
    /// following data for the next call. Call in a loop until it yields
    /// `None`. The header is always decoded big-endian, whatever byte order
    /// the buffer is configured with.
    ///
    /// # Errors
    ///
    /// Returns [`FastError::LengthTooSmall`] or [`FastError::TooLarge`] when
    /// the length prefix is invalid; the stream cannot be resynchronised.
    pub fn parse(buffer: &mut ByteBuffer, max_len: usize) -> Result<Option<Self>, FastError> {
        if buffer.len() < size_of::<i32>() {
            return Ok(None);
        }
        let total = check_length(i32::from_be_bytes(be_field(buffer, 0)?), max_len)?;
        if buffer.len() < total {
            return Ok(None);
        }
        let command = i32::from_be_bytes(be_field(buffer, 4)?);
        let id = i64::from_be_bytes(be_field(buffer, 8)?);
        let is_exception = buffer.read_u8(16)? != 0;
        let body = Bytes::copy_from_slice(buffer.slice(HEADER_LEN, total - HEADER_LEN)?);
        buffer.remove(total)?;
        Ok(Some(Self {
            command,
            id,
            is_exception,
            body,
        }))
    }

    fn total_len(&self) -> Result<i32, FastError> {
        i32::try_from(self.encoded_len()).map_err(|_| FastError::BodyTooLarge(self.body.len()))
    }
}

fn be_field<const N: usize>(buffer: &ByteBuffer, offset: usize) -> Result<[u8; N], FastError> {
    let mut raw = [0u8; N];
    raw.copy_from_slice(buffer.slice(offset, N)?);
    Ok(raw)
}

fn check_length(declared: i32, max_len: usize) -> Result<usize, FastError> {
    let total = usize::try_from(declared).map_err(|_| FastError::LengthTooSmall(declared.into()))?;
    if total < HEADER_LEN {
        return Err(FastError::LengthTooSmall(declared.into()));
    }
    if total > max_len {
        return Err(FastError::TooLarge {
            len: total,
            limit: max_len,
        });
    }
    Ok(total)
}

/// `tokio-util` codec framing [`FastPacket`]s over a byte stream.
///
/// Useful for talking to a Fast server from plain Tokio I/O without a
/// [`Session`](crate::session::Session).
#[derive(Clone, Copy, Debug)]
pub struct FastPacketCodec {
    max_len: usize,
}

impl Default for FastPacketCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_PACKET_LEN) }
}

impl FastPacketCodec {
    /// Create a codec rejecting packets longer than `max_len`.
    #[must_use]
    pub const fn new(max_len: usize) -> Self { Self { max_len } }
}

impl Decoder for FastPacketCodec {
    type Item = FastPacket;
    type Error = FastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(prefix) = src.get(..4) else { return Ok(None) };
        let mut raw = [0u8; 4];
        raw.copy_from_slice(prefix);
        let total = check_length(i32::from_be_bytes(raw), self.max_len)?;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(total).freeze();
        frame.advance(4);
        let command = frame.get_i32();
        let id = frame.get_i64();
        let is_exception = frame.get_u8() != 0;
        Ok(Some(FastPacket {
            command,
            id,
            is_exception,
            body: frame,
        }))
    }
}

impl Encoder<FastPacket> for FastPacketCodec {
    type Error = FastError;

    fn encode(&mut self, item: FastPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = item.total_len()?;
        dst.reserve(item.encoded_len());
        dst.put_i32(total);
        dst.put_i32(item.command);
        dst.put_i64(item.id);
        dst.put_u8(u8::from(item.is_exception));
        dst.put_slice(&item.body);
        Ok(())
    }
}
