//! Consumer client: provider resolution, connection cache, request send.
//!
//! One cached session per provider address.  Sessions observed inactive are
//! evicted and redialed on next use; a dial races only against itself (two
//! callers may dial the same address concurrently), and the losing session
//! is closed as soon as the race is detected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sb_core::awaiter::Awaiter;
use sb_core::{ClientConnection, RegistryClient, RpcError};
use sb_protocol::{Message, Payload, RpcRequest, RpcResponse, Status};
use tracing::{debug, warn};

/// Connect deadline for a consumer→provider dial.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// The consumer's transport layer.
pub struct ConsumerClient {
    registry: Arc<RegistryClient>,
    connections: tokio::sync::Mutex<HashMap<String, Arc<ClientConnection>>>,
}

impl ConsumerClient {
    pub fn new(registry: Arc<RegistryClient>) -> Self {
        ConsumerClient {
            registry,
            connections: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<RegistryClient> {
        &self.registry
    }

    /// Resolve providers, pick one uniformly at random, and write the
    /// framed request.  The returned handle resolves with the response or
    /// fails with one of: service-not-found, transport, timeout, remote.
    pub async fn send_request(&self, request: RpcRequest) -> Result<ResponseHandle, RpcError> {
        let key = request.service_key();
        let providers = self
            .registry
            .lookup(&request.service_name, &request.version, &request.group)
            .await?;
        if providers.is_empty() {
            return Err(RpcError::ServiceNotFound(key));
        }

        // Uniform random choice; weights are carried in the model but the
        // core balancer does not use them.
        let pick = &providers[rand::thread_rng().gen_range(0..providers.len())];
        debug!(service = %key, address = %pick.address, candidates = providers.len(), "provider selected");

        let conn = self.connection_for(&pick.address).await?;
        let awaiter = conn.request(|id| Message::request(id, request)).await?;
        Ok(ResponseHandle { awaiter })
    }

    /// Close every cached session.  Pending requests complete exceptionally
    /// as their reader tasks observe the close.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<ClientConnection>> = {
            let mut cache = self.connections.lock().await;
            cache.drain().map(|(_, conn)| conn).collect()
        };
        for conn in drained {
            conn.close().await;
        }
    }

    /// Cached session for `address`, redialing when the cached one is dead.
    async fn connection_for(&self, address: &str) -> Result<Arc<ClientConnection>, RpcError> {
        let stale = {
            let mut cache = self.connections.lock().await;
            match cache.get(address) {
                Some(conn) if conn.is_active() => return Ok(conn.clone()),
                Some(_) => cache.remove(address),
                None => None,
            }
        };
        if let Some(stale) = stale {
            debug!(%address, "evicting inactive session");
            stale.close().await;
        }

        // Dial outside the lock, retrying once.
        let fresh = match ClientConnection::dial(address, DIAL_TIMEOUT).await {
            Ok(conn) => conn,
            Err(first) => {
                warn!(%address, error = %first, "dial failed, retrying once");
                ClientConnection::dial(address, DIAL_TIMEOUT).await?
            }
        };

        // Another caller may have dialed the same address meanwhile; the
        // loser of that race must be closed.
        let mut cache = self.connections.lock().await;
        if let Some(winner) = cache.get(address) {
            if winner.is_active() {
                let winner = winner.clone();
                drop(cache);
                fresh.close().await;
                return Ok(winner);
            }
        }
        cache.insert(address.to_owned(), fresh.clone());
        Ok(fresh)
    }
}

// ---------------------------------------------------------------------------
// ResponseHandle
// ---------------------------------------------------------------------------

/// One in-flight call's handle; resolves exactly once.
///
/// There is no per-request cancellation: dropping the handle abandons the
/// wait but does not retract the request, and the pending entry is cleaned
/// up when its response (or the session teardown) arrives.
#[derive(Debug)]
pub struct ResponseHandle {
    awaiter: Awaiter,
}

impl ResponseHandle {
    pub fn request_id(&self) -> u64 {
        self.awaiter.request_id()
    }

    /// Await the response for at most `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<RpcResponse, RpcError> {
        into_response(self.awaiter.wait(timeout).await?)
    }
}

fn into_response(msg: Message) -> Result<RpcResponse, RpcError> {
    match msg.payload {
        Payload::Response(response) => {
            if msg.status == Status::Fail {
                let detail = if response.message.is_empty() {
                    "remote invocation failed".to_owned()
                } else {
                    response.message
                };
                Err(RpcError::Remote(detail))
            } else {
                Ok(response)
            }
        }
        other => Err(RpcError::Protocol(format!(
            "unexpected payload type {} for a response",
            other.type_code()
        ))),
    }
}
