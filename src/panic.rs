//! Helpers for reporting panics caught at task boundaries.

use std::{any::Any, fmt};

/// Displays a panic payload.
///
/// The payload is downcast to `String` or `&'static str` when possible and
/// falls back to a placeholder otherwise.
///
/// ```
/// use sockframe::panic::format_panic;
///
/// let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
/// assert_eq!(format_panic(payload.as_ref()).to_string(), "boom");
/// ```
#[derive(Clone, Copy)]
#[must_use]
pub struct PanicMessage<'a>(&'a (dyn Any + Send));

impl fmt::Display for PanicMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            f.write_str("<non-string panic payload>")
        }
    }
}

impl fmt::Debug for PanicMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(self, f) }
}

/// Borrow `panic` as a displayable [`PanicMessage`].
pub fn format_panic(panic: &(dyn Any + Send)) -> PanicMessage<'_> { PanicMessage(panic) }

#[cfg(test)]
mod tests {
    use super::format_panic;

    #[test]
    fn owned_string_payload_is_shown() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(format_panic(payload.as_ref()).to_string(), "kaboom");
    }

    #[test]
    fn opaque_payload_uses_placeholder() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(5_u32);
        assert_eq!(
            format_panic(payload.as_ref()).to_string(),
            "<non-string panic payload>"
        );
    }
}
