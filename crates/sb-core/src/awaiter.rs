//! Pending-request bookkeeping and the single-shot response awaiter.
//!
//! A pending entry is born when a request is written and dies on its first
//! terminal event: response delivery, send failure, connection teardown, or
//! the caller's timeout.  Correlation is strictly by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sb_protocol::Message;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::RpcError;

type Slot = oneshot::Sender<Result<Message, RpcError>>;

// ---------------------------------------------------------------------------
// Request id generator
// ---------------------------------------------------------------------------

/// Strictly monotonic request ids for one client session.
#[derive(Debug, Default)]
pub struct RequestIds {
    counter: AtomicU64,
}

impl RequestIds {
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// ---------------------------------------------------------------------------
// Pending map
// ---------------------------------------------------------------------------

/// Concurrent map of in-flight requests awaiting their responses.
///
/// Each id appears at most once; completing (or failing, or timing out) an
/// entry removes it atomically.
#[derive(Clone, Default, Debug)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<u64, Slot>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a new awaiter under `request_id`.
    ///
    /// Ids come from a monotonic counter so collisions cannot happen in
    /// normal operation; a duplicate insert replaces the stale slot (which
    /// then observes a closed channel) and is logged.
    pub fn install(&self, request_id: u64) -> Awaiter {
        let (tx, rx) = oneshot::channel();
        let previous = self
            .inner
            .lock()
            .expect("pending map lock poisoned")
            .insert(request_id, tx);
        if previous.is_some() {
            warn!(request_id, "duplicate pending request id replaced");
        }
        Awaiter {
            request_id,
            rx,
            pending: self.clone(),
        }
    }

    /// Deliver a terminal result for `request_id`, removing the entry.
    /// Returns false when the id is unknown (already completed or never
    /// installed); callers log that case and drop the message.
    pub fn complete(&self, request_id: u64, result: Result<Message, RpcError>) -> bool {
        let slot = self
            .inner
            .lock()
            .expect("pending map lock poisoned")
            .remove(&request_id);
        match slot {
            Some(tx) => {
                // A receiver dropped mid-flight is indistinguishable from a
                // caller that stopped waiting; nothing more to do.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Remove an entry without delivering anything (timeout path).
    pub fn remove(&self, request_id: u64) -> bool {
        self.inner
            .lock()
            .expect("pending map lock poisoned")
            .remove(&request_id)
            .is_some()
    }

    /// Terminal failure for every in-flight request (connection teardown).
    pub fn fail_all(&self, err: &RpcError) {
        let drained: Vec<Slot> = {
            let mut map = self.inner.lock().expect("pending map lock poisoned");
            map.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(err.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Awaiter
// ---------------------------------------------------------------------------

/// One caller's handle on an in-flight request.
///
/// Single-shot: it resolves exactly once, with the response message or an
/// error.  There is no cancellation of an individual request; the only way
/// to stop waiting is the timeout, which removes the pending entry (the
/// request itself is not retracted from the wire).
#[derive(Debug)]
pub struct Awaiter {
    request_id: u64,
    rx: oneshot::Receiver<Result<Message, RpcError>>,
    pending: PendingRequests,
}

impl Awaiter {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Wait for the terminal event, at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<Message, RpcError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without completing: the session went away.
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(self.request_id);
                Err(RpcError::Timeout)
            }
        }
    }
}
