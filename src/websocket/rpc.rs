//! JSON request/reply messaging over WebSocket text frames.
//!
//! ```text
//! request  {"id": 7, "method": "add", "params": [1, 2]}
//! reply    {"id": 7, "result": 3}
//! failure  {"id": 7, "error": "unknown method \"add\""}
//! ```
//!
//! Both ends install a [`JsonRpcHandler`]: it serves registered methods and
//! routes replies to calls made through a [`JsonRpcPeer`] on the same
//! connection.

use std::{
    collections::HashMap,
    fmt::{self, Display},
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use log::debug;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use super::{WebSocketHandler, WebSocketPeer, WsError};
use crate::pending::{CallError, PendingCallTable};

/// One JSON message: a request when `method` is set, otherwise a reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    /// Correlation id chosen by the caller.
    pub id: u64,
    /// Method to invoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcMessage {
    /// Request for `method`.
    #[must_use]
    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            id,
            method: Some(method.to_owned()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Reply carrying `outcome`.
    #[must_use]
    pub fn reply(id: u64, outcome: Result<Value, String>) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(message) => (None, Some(message)),
        };
        Self {
            id,
            method: None,
            params: None,
            result,
            error,
        }
    }
}

/// Failure of a [`JsonRpcPeer::invoke`].
#[derive(Debug, Error)]
pub enum JsonRpcError {
    /// Timed out, disconnected, or answered with an error.
    #[error(transparent)]
    Call(#[from] CallError),
    /// The request could not be sent.
    #[error(transparent)]
    Ws(#[from] WsError),
    /// Parameters or result did not fit the JSON shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
struct JsonRpcState {
    pending: PendingCallTable<u64, Value>,
    next_id: AtomicU64,
}

impl JsonRpcState {
    fn of(peer: &WebSocketPeer) -> Arc<Self> {
        peer.state_or_insert_with(|| {
            Arc::new(Self {
                pending: PendingCallTable::new(),
                next_id: AtomicU64::new(1),
            })
        })
    }
}

type Method = Arc<dyn Fn(Arc<WebSocketPeer>, Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Serves JSON methods and resolves replies to outgoing calls.
///
/// Every event that is not part of the JSON exchange (binary messages, text
/// that is not an [`RpcMessage`], pings, close) is forwarded to an optional
/// fallback handler.
///
/// # Examples
///
/// ```
/// use sockframe::websocket::JsonRpcHandler;
///
/// let handler = JsonRpcHandler::new()
///     .method("add", |_peer, (a, b): (i64, i64)| async move { Ok::<_, String>(a + b) });
/// assert!(handler.has_method("add"));
/// ```
#[derive(Default)]
pub struct JsonRpcHandler {
    methods: HashMap<String, Method>,
    fallback: Option<Arc<dyn WebSocketHandler>>,
}

impl fmt::Debug for JsonRpcHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRpcHandler")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl JsonRpcHandler {
    /// Handler with no methods.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `name`. Its `params` are decoded into `P` and the handler's
    /// result is encoded as `result`; a handler error becomes `error`.
    /// Registering a name again replaces the earlier method.
    #[must_use]
    pub fn method<P, R, E, F, Fut>(mut self, name: &str, f: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(Arc<WebSocketPeer>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let f = Arc::new(f);
        let method: Method = Arc::new(move |peer, params| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let params: P =
                    serde_json::from_value(params).map_err(|e| format!("invalid params: {e}"))?;
                let result = f(peer, params).await.map_err(|e| e.to_string())?;
                serde_json::to_value(result).map_err(|e| e.to_string())
            })
        });
        self.methods.insert(name.to_owned(), method);
        self
    }

    /// Forward non-RPC events to `handler`.
    #[must_use]
    pub fn fallback<H: WebSocketHandler>(mut self, handler: H) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn has_method(&self, name: &str) -> bool { self.methods.contains_key(name) }

    fn serve(&self, peer: &Arc<WebSocketPeer>, id: u64, name: String, params: Value) {
        let method = self.methods.get(&name).cloned();
        let peer = Arc::clone(peer);
        tokio::spawn(async move {
            let outcome = match method {
                Some(method) => method(Arc::clone(&peer), params).await,
                None => Err(format!("unknown method {name:?}")),
            };
            let reply = RpcMessage::reply(id, outcome);
            let sent = serde_json::to_string(&reply)
                .map_err(|e| e.to_string())
                .and_then(|text| peer.send_text(&text).map_err(|e| e.to_string()));
            if let Err(e) = sent {
                debug!("json reply not sent: id={id}, error={e}");
            }
        });
    }
}

#[async_trait]
impl WebSocketHandler for JsonRpcHandler {
    async fn on_open(&self, peer: &Arc<WebSocketPeer>) {
        if let Some(fallback) = &self.fallback {
            fallback.on_open(peer).await;
        }
    }

    async fn on_text(&self, peer: &Arc<WebSocketPeer>, text: String) {
        let message = match serde_json::from_str::<RpcMessage>(&text) {
            Ok(message) => message,
            Err(_) => {
                if let Some(fallback) = &self.fallback {
                    fallback.on_text(peer, text).await;
                }
                return;
            }
        };
        if let Some(name) = message.method {
            self.serve(peer, message.id, name, message.params.unwrap_or(Value::Null));
            return;
        }
        let outcome = match message.error {
            Some(error) => Err(CallError::Remote(error)),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        if !JsonRpcState::of(peer).pending.complete(&message.id, outcome) {
            debug!("json reply for unknown call dropped: id={}", message.id);
        }
    }

    async fn on_binary(&self, peer: &Arc<WebSocketPeer>, data: Bytes) {
        if let Some(fallback) = &self.fallback {
            fallback.on_binary(peer, data).await;
        }
    }

    async fn on_ping(&self, peer: &Arc<WebSocketPeer>, payload: Bytes) {
        if let Some(fallback) = &self.fallback {
            fallback.on_ping(peer, payload).await;
        }
    }

    async fn on_pong(&self, peer: &Arc<WebSocketPeer>, payload: Bytes) {
        if let Some(fallback) = &self.fallback {
            fallback.on_pong(peer, payload).await;
        }
    }

    async fn on_close(&self, peer: &Arc<WebSocketPeer>, code: u16, reason: String) {
        let failed = JsonRpcState::of(peer).pending.take_all();
        if failed > 0 {
            debug!("json calls failed on close: calls={failed}");
        }
        if let Some(fallback) = &self.fallback {
            fallback.on_close(peer, code, reason).await;
        }
    }

    async fn on_error(&self, peer: &Arc<WebSocketPeer>, error: WsError) {
        if let Some(fallback) = &self.fallback {
            fallback.on_error(peer, error).await;
        }
    }
}

/// Issues JSON calls on one connection.
///
/// Replies are only seen when the connection's handler is a
/// [`JsonRpcHandler`]; otherwise every call times out.
#[derive(Clone, Debug)]
pub struct JsonRpcPeer {
    peer: Arc<WebSocketPeer>,
    state: Arc<JsonRpcState>,
}

impl JsonRpcPeer {
    /// Caller for `peer`.
    #[must_use]
    pub fn new(peer: Arc<WebSocketPeer>) -> Self {
        let state = JsonRpcState::of(&peer);
        Self { peer, state }
    }

    /// Number of calls awaiting a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize { self.state.pending.len() }

    /// Call `method` and decode its result.
    ///
    /// # Errors
    ///
    /// Returns [`JsonRpcError::Call`] on timeout, disconnect or a remote
    /// error, [`JsonRpcError::Ws`] if the request cannot be sent and
    /// [`JsonRpcError::Json`] if encoding or decoding fails.
    pub async fn invoke<P, R>(&self, method: &str, params: P, timeout: Duration) -> Result<R, JsonRpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::to_string(&RpcMessage::request(id, method, serde_json::to_value(params)?))?;
        let call = self.state.pending.register(id, timeout)?;
        if let Err(e) = self.peer.send_text(&request) {
            self.state.pending.complete(&id, Err(CallError::ConnectionClosed));
            return Err(e.into());
        }
        let value = call.await?;
        Ok(serde_json::from_value(value)?)
    }
}
