//! The error taxonomy shared across client, provider and registry code.
//!
//! Display strings matter: the consumer façade's friendly string values are
//! `"error: " + Display`, so e.g. a missing service surfaces as
//! `error: service not found: <serviceKey>`.

/// Every way a call can fail between the caller and a remote handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The registry lookup returned no providers for the service key.
    #[error("service not found: {0}")]
    ServiceNotFound(String),
    /// Dialing or writing to a peer failed.
    #[error("transport: {0}")]
    Transport(String),
    /// The awaiter was not fulfilled inside its window.
    #[error("timed out waiting for response")]
    Timeout,
    /// The response arrived with `status=FAIL`; carries the remote message.
    #[error("remote: {0}")]
    Remote(String),
    /// The session dropped while responses were still pending.
    #[error("connection closed")]
    ConnectionClosed,
    /// A peer broke the wire contract (bad payload shape, unexpected reply).
    #[error("protocol: {0}")]
    Protocol(String),
    /// The registry answered a request with `status=FAIL`.
    #[error("registry: {0}")]
    Registry(String),
    /// The local/fallback invocation path itself failed.
    #[error("local invocation: {0}")]
    LocalInvocation(String),
}

impl RpcError {
    pub fn transport(context: impl std::fmt::Display) -> Self {
        RpcError::Transport(context.to_string())
    }
}
