//! Builders for raw client-side protocol bytes.

use sockframe::{
    fast::{FastError, FastPacket, encode_params},
    websocket::{Frame, Opcode},
};

/// Encode a Fast request whose body is the parameter block of `params`.
///
/// # Errors
///
/// Returns [`FastError::BodyTooLarge`] for parameters that do not fit the
/// length prefix.
///
/// ```rust
/// use sockframe_testing::fast_request;
///
/// let bytes = fast_request(1, 7, &[b"abcd"]).expect("small request");
/// assert_eq!(bytes.len(), 17 + 4 + 4);
/// ```
pub fn fast_request<P: AsRef<[u8]>>(command: i32, id: i64, params: &[P]) -> Result<Vec<u8>, FastError> {
    let body = encode_params(params)?;
    Ok(FastPacket::new(command, id, body).encode()?.to_vec())
}

/// A final client frame masked with a fixed key, as browsers send them.
#[must_use]
pub fn masked_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    Frame::build_with_key(opcode, payload, true, Some([0x37, 0xfa, 0x21, 0x3d]))
}

/// An HTTP/1.1 WebSocket upgrade request for `path` offering `key`.
#[must_use]
pub fn upgrade_request(path: &str, key: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: \
         Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use sockframe::ByteBuffer;

    use super::*;

    #[test]
    fn masked_frame_parses_as_client_frame() {
        let mut buf = ByteBuffer::new();
        buf.add(&masked_frame(Opcode::Text, b"hi"));
        let frame = Frame::parse(&mut buf, true)
            .expect("valid frame")
            .expect("complete frame");
        assert!(frame.fin && frame.masked);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload.as_ref(), b"hi");
    }

    #[test]
    fn fast_request_round_trips_header() {
        let mut buf = ByteBuffer::new();
        buf.add(&fast_request(3, 42, &[b"x"]).expect("encode"));
        let packet = FastPacket::parse(&mut buf, 1024)
            .expect("valid packet")
            .expect("complete packet");
        assert_eq!((packet.command, packet.id, packet.is_exception), (3, 42, false));
    }
}
