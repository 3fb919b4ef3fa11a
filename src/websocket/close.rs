//! Close frame payloads (RFC 6455 §5.5.1, §7.4).

use super::WsError;

/// Normal closure.
pub const NORMAL: u16 = 1000;
/// Endpoint is going away.
pub const GOING_AWAY: u16 = 1001;
/// Protocol violation.
pub const PROTOCOL_ERROR: u16 = 1002;
/// Data type cannot be accepted.
pub const UNSUPPORTED_DATA: u16 = 1003;
/// No status code was present. Never sent on the wire.
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame. Never sent on the wire.
pub const ABNORMAL: u16 = 1006;
/// Payload inconsistent with the message type.
pub const INVALID_PAYLOAD: u16 = 1007;
/// Policy violation.
pub const POLICY_VIOLATION: u16 = 1008;
/// Message too big to process.
pub const MESSAGE_TOO_BIG: u16 = 1009;
/// Unexpected condition on the server.
pub const INTERNAL_ERROR: u16 = 1011;

const MAX_REASON_BYTES: usize = 123;

/// Status code and reason carried by a Close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// Status code.
    pub code: u16,
    /// UTF-8 reason text.
    pub reason: String,
}

impl CloseReason {
    /// Build a reason, truncating `reason` to fit a control frame.
    #[must_use]
    pub fn new(code: u16, reason: &str) -> Self {
        let mut end = reason.len().min(MAX_REASON_BYTES);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            code,
            reason: reason[..end].to_owned(),
        }
    }

    /// Decode a Close payload. An empty payload means a normal closure.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidClosePayload`] for a one-byte payload or a
    /// code that may not appear on the wire, and [`WsError::InvalidUtf8`]
    /// when the reason is not UTF-8.
    ///
    /// # Examples
    ///
    /// ```
    /// use sockframe::websocket::CloseReason;
    ///
    /// let reason = CloseReason::parse(b"\x03\xe8bye").expect("valid");
    /// assert_eq!((reason.code, reason.reason.as_str()), (1000, "bye"));
    /// ```
    pub fn parse(payload: &[u8]) -> Result<Self, WsError> {
        match payload {
            [] => Ok(Self::new(NORMAL, "normal closure")),
            [_] => Err(WsError::InvalidClosePayload),
            [hi, lo, reason @ ..] => {
                let code = u16::from_be_bytes([*hi, *lo]);
                if !is_valid_code(code) {
                    return Err(WsError::InvalidClosePayload);
                }
                let reason = std::str::from_utf8(reason).map_err(|_| WsError::InvalidUtf8)?;
                Ok(Self {
                    code,
                    reason: reason.to_owned(),
                })
            }
        }
    }

    /// Encode as a Close payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&self.code.to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        payload
    }
}

/// Whether `code` may appear in a Close frame.
#[must_use]
pub const fn is_valid_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn empty_payload_is_normal_closure() {
        assert_eq!(CloseReason::parse(&[]).expect("valid"), CloseReason {
            code: NORMAL,
            reason: "normal closure".into()
        });
    }

    #[rstest]
    #[case(&[0x03])]
    #[case(&[0x03, 0xED])]
    #[case(&[0x00, 0x00])]
    fn bad_payloads_are_rejected(#[case] payload: &[u8]) {
        assert!(matches!(
            CloseReason::parse(payload),
            Err(WsError::InvalidClosePayload)
        ));
    }

    #[test]
    fn invalid_reason_utf8_is_rejected() {
        assert!(matches!(
            CloseReason::parse(&[0x03, 0xE8, 0xFF]),
            Err(WsError::InvalidUtf8)
        ));
    }

    #[test]
    fn long_reason_is_truncated_on_char_boundary() {
        let reason = CloseReason::new(NORMAL, &"é".repeat(100));
        assert!(reason.encode().len() <= 125);
        assert!(reason.reason.chars().all(|c| c == 'é'));
    }
}
