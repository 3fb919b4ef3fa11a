use bytes::Bytes;

use super::Headers;

/// Response written back by [`HttpMiddleware`](super::HttpMiddleware).
///
/// # Examples
///
/// ```
/// use sockframe::http::HttpResponse;
///
/// let bytes = HttpResponse::new(200).text("ok").to_bytes();
/// assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
/// assert!(bytes.ends_with(b"\r\n\r\nok"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Header lines, excluding `Content-Length`.
    pub headers: Headers,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Empty response with the standard reason phrase for `status`.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_owned(),
            headers: Headers::default(),
            body: Bytes::new(),
        }
    }

    /// `404 Not Found`.
    #[must_use]
    pub fn not_found() -> Self { Self::new(404).text("not found") }

    /// `400 Bad Request` explaining `reason`.
    #[must_use]
    pub fn bad_request(reason: &str) -> Self { Self::new(400).text(reason) }

    /// Add a header line.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Plain-text body.
    #[must_use]
    pub fn text(self, text: &str) -> Self {
        self.header("Content-Type", "text/plain; charset=utf-8")
            .body(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Serialize the response. `Content-Length` is added for every status
    /// that may carry a body.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in self.headers.iter() {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        let bodyless = (100..200).contains(&self.status) || self.status == 204;
        if !bodyless {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
