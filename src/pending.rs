//! Correlation table for in-flight requests awaiting a reply.
//!
//! Each entry pairs a request id with a one-shot completion slot and a
//! timeout timer. Whichever of *reply*, *timeout* or *connection drop* wins the
//! atomic removal from the table completes the call; later arrivals find no
//! entry and become no-ops, so every caller observes exactly one outcome.

use std::{
    fmt,
    future::Future,
    hash::Hash,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;
use tokio::{sync::oneshot, task::AbortHandle};

/// Terminal failure of a pending call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallError {
    /// No reply arrived within the configured timeout.
    #[error("call timed out")]
    Timeout,
    /// The connection closed before a reply arrived.
    #[error("connection closed before a reply arrived")]
    ConnectionClosed,
    /// The peer answered with an exception.
    #[error("remote exception: {0}")]
    Remote(String),
    /// A call with the same id is already outstanding.
    #[error("request id already pending")]
    DuplicateId,
}

struct Waiter<T> {
    reply: oneshot::Sender<Result<T, CallError>>,
    timer: Option<AbortHandle>,
}

impl<T> Waiter<T> {
    fn finish(self, result: Result<T, CallError>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have stopped waiting; nothing to do then.
        let _ = self.reply.send(result);
    }
}

/// Concurrent map from request id to its completion slot.
///
/// Cloning yields another handle to the same table.
pub struct PendingCallTable<K, T> {
    waiters: Arc<DashMap<K, Waiter<T>>>,
}

impl<K, T> Clone for PendingCallTable<K, T> {
    fn clone(&self) -> Self {
        Self {
            waiters: Arc::clone(&self.waiters),
        }
    }
}

impl<K, T> Default for PendingCallTable<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            waiters: Arc::new(DashMap::new()),
        }
    }
}

impl<K, T> fmt::Debug for PendingCallTable<K, T>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCallTable")
            .field("pending", &self.waiters.len())
            .finish()
    }
}

impl<K, T> PendingCallTable<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `id` and arm a timer that fails the call after `timeout`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::DuplicateId`] if `id` is already outstanding.
    pub fn register(&self, id: K, timeout: Duration) -> Result<PendingCall<T>, CallError> {
        let (tx, rx) = oneshot::channel();
        match self.waiters.entry(id.clone()) {
            Entry::Occupied(_) => return Err(CallError::DuplicateId),
            Entry::Vacant(slot) => {
                slot.insert(Waiter {
                    reply: tx,
                    timer: None,
                });
            }
        }

        let table = Arc::downgrade(&self.waiters);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(table) = table.upgrade() else { return };
            if let Some((_, waiter)) = table.remove(&timer_id) {
                log::debug!("pending call timed out: id={timer_id:?}");
                crate::metrics::inc_call_timeouts();
                waiter.finish(Err(CallError::Timeout));
            }
        });

        match self.waiters.get_mut(&id) {
            Some(mut waiter) => waiter.timer = Some(timer.abort_handle()),
            // Completed before the timer could be attached.
            None => timer.abort(),
        }
        Ok(PendingCall { reply: rx })
    }

    /// Complete the call registered under `id`.
    ///
    /// Returns `false` when no such call is outstanding, for instance because
    /// it already timed out.
    pub fn complete(&self, id: &K, result: Result<T, CallError>) -> bool {
        match self.waiters.remove(id) {
            Some((_, waiter)) => {
                waiter.finish(result);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding call with [`CallError::ConnectionClosed`].
    ///
    /// Returns the number of calls failed.
    pub fn take_all(&self) -> usize {
        let ids: Vec<K> = self.waiters.iter().map(|entry| entry.key().clone()).collect();
        ids.iter()
            .filter(|id| self.complete(id, Err(CallError::ConnectionClosed)))
            .count()
    }

    /// Returns `true` while a call with `id` is outstanding.
    #[must_use]
    pub fn contains(&self, id: &K) -> bool { self.waiters.contains_key(id) }

    /// Number of outstanding calls.
    #[must_use]
    pub fn len(&self) -> usize { self.waiters.len() }

    /// Returns `true` when no calls are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.waiters.is_empty() }
}

/// Future resolving to the outcome of a registered call.
#[must_use = "a pending call does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingCall<T> {
    reply: oneshot::Receiver<Result<T, CallError>>,
}

impl<T> Future for PendingCall<T> {
    type Output = Result<T, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.reply).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The table was dropped along with its connection.
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
