//! RFC 6455 frame parsing and building.
//!
//! ```text
//! byte 0   FIN | RSV1 | RSV2 | RSV3 | opcode(4)
//! byte 1   MASK | len(7)        len 126 -> u16 follows, 127 -> u64 follows
//! [2 or 8 bytes extended length, network order]
//! [4 bytes masking key if MASK]
//! payload
//! ```

use bytes::Bytes;

use super::WsError;
use crate::byte_buffer::ByteBuffer;

/// Frame opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continues a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text data.
    Text = 0x1,
    /// Binary data.
    Binary = 0x2,
    /// Close control frame.
    Close = 0x8,
    /// Ping control frame.
    Ping = 0x9,
    /// Pong control frame.
    Pong = 0xA,
}

impl Opcode {
    /// Decode the low four bits of the first header byte.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidOpcode`] for reserved values.
    pub const fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(WsError::InvalidOpcode(other)),
        }
    }

    /// Returns `true` for Close, Ping and Pong.
    #[must_use]
    pub const fn is_control(self) -> bool { matches!(self, Self::Close | Self::Ping | Self::Pong) }
}

/// One decoded frame with its payload already unmasked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Last fragment of a message.
    pub fin: bool,
    /// Frame type.
    pub opcode: Opcode,
    /// Whether the frame arrived masked.
    pub masked: bool,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Decode one frame from the front of `buffer` without a payload limit.
    ///
    /// # Errors
    ///
    /// See [`parse_with_limit`](Self::parse_with_limit).
    pub fn parse(buffer: &mut ByteBuffer, require_mask: bool) -> Result<Option<Self>, WsError> {
        Self::parse_with_limit(buffer, require_mask, usize::MAX)
    }

    /// Decode one frame from the front of `buffer`.
    ///
    /// Returns `Ok(None)` without consuming anything until the whole frame is
    /// buffered. On success exactly the frame's bytes are removed.
    /// `require_mask` is set when reading frames sent by a client.
    ///
    /// # Errors
    ///
    /// Returns a [`WsError`] for reserved bits, unknown opcodes, an unmasked
    /// client frame, a 64-bit length with its top bit set, or a payload above
    /// `max_payload`. The stream cannot be resynchronised after an error.
    pub fn parse_with_limit(
        buffer: &mut ByteBuffer,
        require_mask: bool,
        max_payload: usize,
    ) -> Result<Option<Self>, WsError> {
        let bytes = buffer.as_slice();
        let [b0, b1, ..] = *bytes else { return Ok(None) };
        if b0 & 0x70 != 0 {
            return Err(WsError::ReservedBitsSet);
        }
        let fin = b0 & 0x80 != 0;
        let opcode = Opcode::from_u8(b0 & 0x0F)?;
        let masked = b1 & 0x80 != 0;
        if require_mask && !masked {
            return Err(WsError::UnmaskedClientFrame);
        }

        let (len, ext_len) = match b1 & 0x7F {
            126 => {
                let Some(ext) = bytes.get(2..4) else { return Ok(None) };
                (u64::from(u16::from_be_bytes([ext[0], ext[1]])), 2)
            }
            127 => {
                let Some(ext) = bytes.get(2..10) else { return Ok(None) };
                let mut raw = [0u8; 8];
                raw.copy_from_slice(ext);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(WsError::Protocol("64-bit payload length has its top bit set"));
                }
                (len, 8)
            }
            short => (u64::from(short), 0),
        };
        let payload_len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= max_payload)
            .ok_or(WsError::PayloadTooLarge {
                len,
                limit: max_payload,
            })?;

        let key_offset: usize = 2 + ext_len;
        let payload_offset = key_offset + if masked { 4 } else { 0 };
        let Some(total) = payload_offset.checked_add(payload_len) else {
            return Err(WsError::PayloadTooLarge {
                len,
                limit: max_payload,
            });
        };
        if bytes.len() < total {
            return Ok(None);
        }

        let mut payload = bytes[payload_offset..total].to_vec();
        if masked {
            let mut key = [0u8; 4];
            key.copy_from_slice(&bytes[key_offset..payload_offset]);
            apply_mask(&mut payload, key);
        }
        buffer
            .remove(total)
            .map_err(|_| WsError::Protocol("frame extends past buffer"))?;
        Ok(Some(Self {
            fin,
            opcode,
            masked,
            payload: Bytes::from(payload),
        }))
    }

    /// Encode a frame, masking it with a random key when `mask` is set.
    ///
    /// # Examples
    ///
    /// ```
    /// use sockframe::websocket::{Frame, Opcode};
    ///
    /// assert_eq!(Frame::build(Opcode::Text, b"hi", true, false), [0x81, 0x02, b'h', b'i']);
    /// ```
    #[must_use]
    pub fn build(opcode: Opcode, payload: &[u8], fin: bool, mask: bool) -> Vec<u8> {
        let key = mask.then(rand::random::<[u8; 4]>);
        Self::build_with_key(opcode, payload, fin, key)
    }

    /// Encode a frame, masking with `key` if given.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "each match arm bounds the length it narrows"
    )]
    pub fn build_with_key(opcode: Opcode, payload: &[u8], fin: bool, key: Option<[u8; 4]>) -> Vec<u8> {
        let mut out = Vec::with_capacity(14 + payload.len());
        out.push((u8::from(fin) << 7) | opcode as u8);
        let mask_bit = if key.is_some() { 0x80 } else { 0 };
        match payload.len() {
            len @ 0..=125 => out.push(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                out.push(mask_bit | 126);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                out.push(mask_bit | 127);
                out.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }
        match key {
            Some(key) => {
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.extend_from_slice(payload),
        }
        out
    }
}

/// XOR `data` with `key` repeated every four bytes. Applying it twice
/// restores the input.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (index, byte) in data.iter_mut().enumerate() {
        *byte ^= key[index % 4];
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn buffer_of(bytes: &[u8]) -> ByteBuffer {
        let mut buffer = ByteBuffer::new();
        buffer.add(bytes);
        buffer
    }

    #[rstest]
    #[case(0, 2)]
    #[case(125, 2)]
    #[case(126, 4)]
    #[case(65_535, 4)]
    #[case(65_536, 10)]
    fn length_encoding_branches(#[case] len: usize, #[case] header: usize) {
        let payload = vec![0x5A; len];
        let wire = Frame::build_with_key(Opcode::Binary, &payload, true, None);
        assert_eq!(wire.len(), header + len);

        let mut buffer = buffer_of(&wire);
        let frame = Frame::parse(&mut buffer, false).expect("valid").expect("complete");
        assert_eq!(frame.payload.len(), len);
        assert!(buffer.is_empty());
    }

    #[rstest]
    #[case(126, 254)]
    #[case(65_536, 255)]
    fn masked_extended_indicator_bytes(#[case] len: usize, #[case] indicator: u8) {
        let wire = Frame::build_with_key(Opcode::Binary, &vec![0; len], true, Some([1, 2, 3, 4]));
        assert_eq!(wire[1], indicator);
    }

    #[rstest]
    #[case(&[0xC1, 0x80, 0, 0, 0, 0], "reserved")]
    #[case(&[0x83, 0x80, 0, 0, 0, 0], "opcode")]
    #[case(&[0x81, 0x00], "unmasked")]
    fn server_rejects_bad_headers(#[case] wire: &[u8], #[case] kind: &str) {
        let err = Frame::parse(&mut buffer_of(wire), true).expect_err("invalid header");
        let matched = match kind {
            "reserved" => matches!(err, WsError::ReservedBitsSet),
            "opcode" => matches!(err, WsError::InvalidOpcode(0x3)),
            _ => matches!(err, WsError::UnmaskedClientFrame),
        };
        assert!(matched, "unexpected error {err:?}");
        assert_eq!(err.close_code(), 1002);
    }

    #[test]
    fn top_bit_of_64_bit_length_is_rejected() {
        let mut wire = vec![0x82, 0x7F];
        wire.extend_from_slice(&(1u64 << 63).to_be_bytes());
        assert!(matches!(
            Frame::parse(&mut buffer_of(&wire), false),
            Err(WsError::Protocol(_))
        ));
    }

    #[test]
    fn payload_limit_applies_before_buffering() {
        let wire = Frame::build_with_key(Opcode::Binary, &[0; 200], true, None);
        assert!(matches!(
            Frame::parse_with_limit(&mut buffer_of(&wire[..4]), false, 100),
            Err(WsError::PayloadTooLarge { len: 200, limit: 100 })
        ));
    }

    #[test]
    fn trailing_bytes_are_kept() {
        let mut wire = Frame::build(Opcode::Ping, b"hello", true, true);
        wire.extend_from_slice(&[0x81]);
        let mut buffer = buffer_of(&wire);
        let frame = Frame::parse(&mut buffer, true).expect("valid").expect("complete");
        assert_eq!(frame.opcode, Opcode::Ping);
        assert_eq!(frame.payload.as_ref(), b"hello");
        assert_eq!(buffer.as_slice(), &[0x81]);
    }

    proptest! {
        #[test]
        fn mask_is_an_involution(data in proptest::collection::vec(any::<u8>(), 0..512), key in any::<[u8; 4]>()) {
            let mut masked = data.clone();
            apply_mask(&mut masked, key);
            apply_mask(&mut masked, key);
            prop_assert_eq!(masked, data);
        }

        #[test]
        fn masked_frames_parse_back(payload in proptest::collection::vec(any::<u8>(), 0..300), key in any::<[u8; 4]>()) {
            let wire = Frame::build_with_key(Opcode::Binary, &payload, true, Some(key));
            for cut in 0..wire.len() {
                prop_assert!(Frame::parse(&mut buffer_of(&wire[..cut]), true).expect("valid prefix").is_none());
            }
            let frame = Frame::parse(&mut buffer_of(&wire), true).expect("valid").expect("complete");
            prop_assert!(frame.masked);
            prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
        }
    }
}
