//! Incremental HTTP/1.x message parsing.

use std::fmt;

use bytes::Bytes;

use super::HttpError;

/// Default ceiling on a request or response head.
pub const DEFAULT_MAX_HEAD: usize = 16 * 1024;
/// Default ceiling on a request body.
pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

/// Protocol version of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Version {
    /// `HTTP/1.0`
    Http10,
    /// `HTTP/1.1`
    Http11,
}

impl Version {
    fn parse(raw: &str) -> Result<Self, HttpError> {
        match raw {
            "HTTP/1.0" => Ok(Self::Http10),
            "HTTP/1.1" => Ok(Self::Http11),
            _ => Err(HttpError::UnsupportedVersion),
        }
    }

    /// Wire form of the version.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Append a header, keeping earlier values of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> { self.get_all(name).next() }

    /// Every value of `name`, in order of appearance.
    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if any comma-separated element of `name` equals `token`,
    /// ignoring ASCII case.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of header lines.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns `true` if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// A parsed HTTP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method, as sent.
    pub method: String,
    /// Target path without the query string.
    pub path: String,
    /// Query string after `?`, if present.
    pub query: Option<String>,
    /// Protocol version.
    pub version: Version,
    /// Header lines.
    pub headers: Headers,
    /// Body bytes, sized by `Content-Length`.
    pub body: Bytes,
}

impl HttpRequest {
    /// Parse one request from the front of `buf` with default limits.
    ///
    /// Returns the request and the number of bytes it occupied, or `None`
    /// while the head or body is incomplete.
    ///
    /// # Errors
    ///
    /// Returns an [`HttpError`] when the bytes cannot be an HTTP request.
    ///
    /// # Examples
    ///
    /// ```
    /// use sockframe::http::HttpRequest;
    ///
    /// let raw = b"GET /chat?room=1 HTTP/1.1\r\nHost: x\r\n\r\n";
    /// let (request, used) = HttpRequest::parse(raw).expect("valid").expect("complete");
    /// assert_eq!(request.path, "/chat");
    /// assert_eq!(request.query.as_deref(), Some("room=1"));
    /// assert_eq!(used, raw.len());
    /// ```
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, HttpError> {
        Self::parse_with_limits(buf, DEFAULT_MAX_HEAD, DEFAULT_MAX_BODY)
    }

    /// Parse with explicit head and body ceilings.
    ///
    /// # Errors
    ///
    /// See [`parse`](Self::parse).
    pub fn parse_with_limits(
        buf: &[u8],
        max_head: usize,
        max_body: usize,
    ) -> Result<Option<(Self, usize)>, HttpError> {
        let Some((head, head_len)) = split_head(buf, max_head)? else { return Ok(None) };
        let mut lines = head.split("\r\n");
        let request_line = lines.next().ok_or(HttpError::BadRequestLine)?;
        let mut parts = request_line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HttpError::BadRequestLine);
        };
        if method.is_empty() || target.is_empty() {
            return Err(HttpError::BadRequestLine);
        }
        let version = Version::parse(version)?;
        let headers = parse_headers(lines)?;

        if headers.get("transfer-encoding").is_some() {
            return Err(HttpError::UnsupportedTransferEncoding);
        }
        let body_len = content_length(&headers)?;
        if body_len > max_body {
            return Err(HttpError::BodyTooLarge { limit: max_body });
        }
        let total = head_len + body_len;
        let Some(body) = buf.get(head_len..total) else { return Ok(None) };

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };
        let request = Self {
            method: method.to_owned(),
            path,
            query,
            version,
            headers,
            body: Bytes::copy_from_slice(body),
        };
        Ok(Some((request, total)))
    }

    /// Whether the connection should stay open after the response.
    ///
    /// HTTP/1.1 persists unless `Connection: close` is sent; HTTP/1.0 only
    /// persists with `Connection: keep-alive`.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http11 => !self.headers.has_token("connection", "close"),
            Version::Http10 => self.headers.has_token("connection", "keep-alive"),
        }
    }
}

/// Status line and headers of an HTTP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponseHead {
    /// Protocol version.
    pub version: Version,
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Header lines.
    pub headers: Headers,
}

impl HttpResponseHead {
    /// Parse a response head from the front of `buf`.
    ///
    /// Returns the head and its length in bytes, or `None` while incomplete.
    /// Any body is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns an [`HttpError`] when the bytes cannot be an HTTP response.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, HttpError> {
        let Some((head, head_len)) = split_head(buf, DEFAULT_MAX_HEAD)? else { return Ok(None) };
        let mut lines = head.split("\r\n");
        let status_line = lines.next().ok_or(HttpError::BadStatusLine)?;
        let mut parts = status_line.splitn(3, ' ');
        let (Some(version), Some(status)) = (parts.next(), parts.next()) else {
            return Err(HttpError::BadStatusLine);
        };
        let version = Version::parse(version)?;
        let status = status
            .parse::<u16>()
            .map_err(|_| HttpError::BadStatusLine)?;
        let reason = parts.next().unwrap_or_default().to_owned();
        let headers = parse_headers(lines)?;
        Ok(Some((
            Self {
                version,
                status,
                reason,
                headers,
            },
            head_len,
        )))
    }
}

/// Locate the end of the head. Returns the head text without the blank line
/// and the byte count including it.
fn split_head(buf: &[u8], max_head: usize) -> Result<Option<(&str, usize)>, HttpError> {
    let Some(end) = buf.windows(4).position(|window| window == b"\r\n\r\n") else {
        if buf.len() > max_head {
            return Err(HttpError::HeadTooLarge { limit: max_head });
        }
        return Ok(None);
    };
    if end + 4 > max_head {
        return Err(HttpError::HeadTooLarge { limit: max_head });
    }
    let head = std::str::from_utf8(&buf[..end]).map_err(|_| HttpError::NotUtf8)?;
    Ok(Some((head, end + 4)))
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, HttpError> {
    let mut headers = Headers::default();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(HttpError::BadHeader)?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(HttpError::BadHeader);
        }
        headers.append(name, value.trim());
    }
    Ok(headers)
}

fn content_length(headers: &Headers) -> Result<usize, HttpError> {
    let mut declared = None;
    for value in headers.get_all("content-length") {
        let len = value
            .parse::<usize>()
            .map_err(|_| HttpError::BadContentLength)?;
        if declared.is_some_and(|previous| previous != len) {
            return Err(HttpError::BadContentLength);
        }
        declared = Some(len);
    }
    Ok(declared.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn body_waits_for_content_length() {
        let raw = b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel";
        assert_eq!(HttpRequest::parse(raw), Ok(None));

        let mut full = raw.to_vec();
        full.extend_from_slice(b"loGET");
        let (request, used) = HttpRequest::parse(&full).expect("valid").expect("complete");
        assert_eq!(request.body.as_ref(), b"hello");
        assert_eq!(&full[used..], b"GET");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let raw = b"GET / HTTP/1.1\r\nConnection: keep-alive, Upgrade\r\nUPGRADE: WebSocket\r\n\r\n";
        let (request, _) = HttpRequest::parse(raw).expect("valid").expect("complete");
        assert!(request.headers.has_token("connection", "upgrade"));
        assert_eq!(request.headers.get("upgrade"), Some("WebSocket"));
    }

    #[test]
    fn header_value_outlives_lookup_name() {
        let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (request, _) = HttpRequest::parse(raw).expect("valid").expect("complete");
        let host = {
            let name = String::from("host");
            request.headers.get(&name)
        };
        assert_eq!(host, Some("example.com"));
    }

    #[rstest]
    #[case(b"GET /\r\n\r\n".as_slice(), HttpError::BadRequestLine)]
    #[case(b"GET / HTTP/2.0\r\n\r\n".as_slice(), HttpError::UnsupportedVersion)]
    #[case(b"GET / HTTP/1.1\r\nno-colon\r\n\r\n".as_slice(), HttpError::BadHeader)]
    #[case(b"GET / HTTP/1.1\r\nContent-Length: -1\r\n\r\n".as_slice(), HttpError::BadContentLength)]
    #[case(
        b"GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".as_slice(),
        HttpError::UnsupportedTransferEncoding
    )]
    fn malformed_requests_are_rejected(#[case] raw: &[u8], #[case] expected: HttpError) {
        assert_eq!(HttpRequest::parse(raw), Err(expected));
    }

    #[test]
    fn unterminated_head_hits_limit() {
        let raw = vec![b'a'; 64];
        assert_eq!(
            HttpRequest::parse_with_limits(&raw, 32, 0),
            Err(HttpError::HeadTooLarge { limit: 32 })
        );
    }

    #[rstest]
    #[case("HTTP/1.1", "", true)]
    #[case("HTTP/1.1", "Connection: close\r\n", false)]
    #[case("HTTP/1.0", "", false)]
    #[case("HTTP/1.0", "Connection: Keep-Alive\r\n", true)]
    fn keep_alive_follows_version_and_connection(
        #[case] version: &str,
        #[case] extra: &str,
        #[case] expected: bool,
    ) {
        let raw = format!("GET / {version}\r\n{extra}\r\n");
        let (request, _) = HttpRequest::parse(raw.as_bytes())
            .expect("valid")
            .expect("complete");
        assert_eq!(request.keep_alive(), expected);
    }

    #[test]
    fn response_head_leaves_body() {
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x81\x00";
        let (head, used) = HttpResponseHead::parse(raw).expect("valid").expect("complete");
        assert_eq!(head.status, 101);
        assert_eq!(head.reason, "Switching Protocols");
        assert_eq!(&raw[used..], b"\x81\x00");
    }
}
