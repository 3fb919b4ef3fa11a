use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;

use super::{WebSocketPeer, WsError};

/// Application callbacks for one WebSocket connection.
///
/// Events for a connection are delivered one at a time, in the order their
/// frames arrived, on a task owned by the connection. Pings have already been
/// answered by the time [`on_ping`](Self::on_ping) runs.
#[async_trait]
pub trait WebSocketHandler: Send + Sync + 'static {
    /// The handshake completed.
    async fn on_open(&self, _peer: &Arc<WebSocketPeer>) {}

    /// A complete text message arrived.
    async fn on_text(&self, _peer: &Arc<WebSocketPeer>, _text: String) {}

    /// A complete binary message arrived.
    async fn on_binary(&self, _peer: &Arc<WebSocketPeer>, _data: Bytes) {}

    /// A Ping arrived and was answered.
    async fn on_ping(&self, _peer: &Arc<WebSocketPeer>, _payload: Bytes) {}

    /// A Pong arrived that did not answer one of our pings.
    async fn on_pong(&self, _peer: &Arc<WebSocketPeer>, _payload: Bytes) {}

    /// The connection is closing. Called exactly once per connection; a
    /// dropped connection reports code 1006.
    async fn on_close(&self, _peer: &Arc<WebSocketPeer>, _code: u16, _reason: String) {}

    /// The peer violated the protocol. `on_close` follows.
    async fn on_error(&self, _peer: &Arc<WebSocketPeer>, _error: WsError) {}
}

/// Sends every data message straight back.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl WebSocketHandler for EchoHandler {
    async fn on_text(&self, peer: &Arc<WebSocketPeer>, text: String) {
        if let Err(e) = peer.send_text(&text) {
            debug!("echo failed: error={e}");
        }
    }

    async fn on_binary(&self, peer: &Arc<WebSocketPeer>, data: Bytes) {
        if let Err(e) = peer.send_binary(&data) {
            debug!("echo failed: error={e}");
        }
    }
}
