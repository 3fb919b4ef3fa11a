//! HTTP upgrade handshake (RFC 6455 §4).

use base64::{Engine, engine::general_purpose::STANDARD};
use sha1::{Digest, Sha1};

use super::HandshakeError;
use crate::http::{HttpRequest, HttpResponse, HttpResponseHead};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derive `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`.
///
/// # Examples
///
/// ```
/// use sockframe::websocket::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Fresh random `Sec-WebSocket-Key`.
#[must_use]
pub fn generate_key() -> String { STANDARD.encode(rand::random::<[u8; 16]>()) }

/// A request that qualifies for a WebSocket upgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Client's `Sec-WebSocket-Key`.
    pub key: String,
    /// Requested path.
    pub path: String,
}

impl UpgradeRequest {
    /// Recognise a `GET` carrying `Connection: Upgrade`, `Upgrade: websocket`,
    /// `Sec-WebSocket-Version: 13` and a key. Anything else is plain HTTP.
    #[must_use]
    pub fn detect(request: &HttpRequest) -> Option<Self> {
        let headers = &request.headers;
        let qualifies = request.method == "GET"
            && headers.has_token("connection", "upgrade")
            && headers.has_token("upgrade", "websocket")
            && headers.get("sec-websocket-version") == Some("13");
        if !qualifies {
            return None;
        }
        let key = headers.get("sec-websocket-key").filter(|key| !key.is_empty())?;
        Some(Self {
            key: key.to_owned(),
            path: request.path.clone(),
        })
    }

    /// The `101 Switching Protocols` reply accepting this request.
    #[must_use]
    pub fn accept(&self) -> HttpResponse { accept_response(&self.key) }
}

/// `101 Switching Protocols` reply for `key`.
#[must_use]
pub fn accept_response(key: &str) -> HttpResponse {
    HttpResponse::new(101)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", compute_accept_key(key))
}

/// Client side of the handshake.
#[derive(Clone, Debug)]
pub struct ClientHandshake {
    host: String,
    path: String,
    key: String,
}

impl ClientHandshake {
    /// Prepare an upgrade request for `path` on `host` with a random key.
    #[must_use]
    pub fn new(host: &str, path: &str) -> Self {
        Self {
            host: host.to_owned(),
            path: if path.is_empty() { "/".to_owned() } else { path.to_owned() },
            key: generate_key(),
        }
    }

    /// Key sent in this handshake.
    #[must_use]
    pub fn key(&self) -> &str { &self.key }

    /// Serialized `GET` upgrade request.
    #[must_use]
    pub fn request_bytes(&self) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
            self.path, self.host, self.key
        )
        .into_bytes()
    }

    /// Check the server's response head.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] unless the response is a `101` with the
    /// upgrade headers and the expected accept hash.
    pub fn verify(&self, response: &HttpResponseHead) -> Result<(), HandshakeError> {
        if response.status != 101 {
            return Err(HandshakeError::UnexpectedStatus(response.status));
        }
        if !response.headers.has_token("upgrade", "websocket") {
            return Err(HandshakeError::BadHeader("Upgrade"));
        }
        if !response.headers.has_token("connection", "upgrade") {
            return Err(HandshakeError::BadHeader("Connection"));
        }
        let accept = response
            .headers
            .get("sec-websocket-accept")
            .ok_or(HandshakeError::BadHeader("Sec-WebSocket-Accept"))?;
        if accept != compute_accept_key(&self.key) {
            return Err(HandshakeError::AcceptMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw: &str) -> HttpRequest {
        HttpRequest::parse(raw.as_bytes())
            .expect("valid")
            .expect("complete")
            .0
    }

    const UPGRADE: &str = "GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn qualifying_request_is_detected() {
        let upgrade = UpgradeRequest::detect(&request(UPGRADE)).expect("upgrade");
        assert_eq!(upgrade.path, "/chat");
        let text = String::from_utf8(upgrade.accept().to_bytes()).expect("ascii");
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[test]
    fn wrong_version_is_plain_http() {
        let raw = UPGRADE.replace("Version: 13", "Version: 8");
        assert!(UpgradeRequest::detect(&request(&raw)).is_none());
    }

    #[test]
    fn missing_key_is_plain_http() {
        let raw = UPGRADE.replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
        assert!(UpgradeRequest::detect(&request(&raw)).is_none());
    }

    #[test]
    fn client_verifies_server_reply() {
        let handshake = ClientHandshake::new("localhost", "/chat");
        let server_side = request(&String::from_utf8(handshake.request_bytes()).expect("ascii"));
        let upgrade = UpgradeRequest::detect(&server_side).expect("client sends a valid upgrade");
        let reply = upgrade.accept().to_bytes();
        let (head, _) = HttpResponseHead::parse(&reply).expect("valid").expect("complete");
        assert!(handshake.verify(&head).is_ok());

        let other = ClientHandshake::new("localhost", "/chat");
        assert!(matches!(other.verify(&head), Err(HandshakeError::AcceptMismatch)));
    }
}
