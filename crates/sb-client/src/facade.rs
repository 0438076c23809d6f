//! Invocation façade.
//!
//! A [`ServiceProxy`] is the typed remote-method surface for one service.
//! Per-call flow: evaluate the condition (false + local impl selects the
//! local path), otherwise send with the retry policy and await the
//! response.  On the synchronous surface every failure becomes a friendly
//! value, consulting the local resolver first when local service is
//! enabled; the asynchronous surface (`invoke`) hands back the response
//! handle and lets errors flow through it.

use std::sync::Arc;
use std::time::Duration;

use sb_core::RpcError;
use sb_protocol::{json_type_name, service_key, RpcRequest};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::condition::ConditionEvaluator;
use crate::consumer::{ConsumerClient, ResponseHandle};
use crate::friendly::FriendlyReturn;
use crate::local::LocalServiceRegistry;

/// Back-off between transport-failed send attempts.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Call configuration
// ---------------------------------------------------------------------------

/// Per-proxy call configuration.
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub version: String,
    pub group: String,
    /// Await bound for the synchronous surface.
    pub timeout: Duration,
    /// Extra send attempts after the first (transport failures only).
    pub retries: u32,
    pub enable_local_service: bool,
    pub condition: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        CallConfig {
            version: "1.0.0".to_owned(),
            group: String::new(),
            timeout: Duration::from_millis(20_000),
            retries: 2,
            enable_local_service: false,
            condition: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`ServiceProxy`]; stands in for field-injection style wiring.
pub struct ProxyBuilder {
    consumer: Arc<ConsumerClient>,
    service_name: String,
    cfg: CallConfig,
    locals: Option<Arc<LocalServiceRegistry>>,
    conditions: Option<Arc<ConditionEvaluator>>,
}

impl ProxyBuilder {
    pub fn new(consumer: Arc<ConsumerClient>, service_name: impl Into<String>) -> Self {
        ProxyBuilder {
            consumer,
            service_name: service_name.into(),
            cfg: CallConfig::default(),
            locals: None,
            conditions: None,
        }
    }

    /// Builder preconfigured from the framework config: the configured
    /// consumer timeout replaces the 20 s default.
    pub fn from_config(
        consumer: Arc<ConsumerClient>,
        service_name: impl Into<String>,
        cfg: &sb_core::RpcConfig,
    ) -> Self {
        let mut builder = Self::new(consumer, service_name);
        builder.cfg.timeout = Duration::from_millis(cfg.client_timeout_ms);
        builder
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.cfg.version = version.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.cfg.group = group.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.cfg.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.cfg.retries = retries;
        self
    }

    pub fn enable_local_service(mut self, enable: bool) -> Self {
        self.cfg.enable_local_service = enable;
        self
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.cfg.condition = condition.into();
        self
    }

    /// Share a local/fallback registry with this proxy.
    pub fn local_services(mut self, locals: Arc<LocalServiceRegistry>) -> Self {
        self.locals = Some(locals);
        self
    }

    /// Share a condition evaluator (with its custom strategies).
    pub fn conditions(mut self, conditions: Arc<ConditionEvaluator>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn build(self) -> ServiceProxy {
        ServiceProxy {
            service_name: self.service_name,
            cfg: self.cfg,
            consumer: self.consumer,
            locals: self.locals.unwrap_or_default(),
            conditions: self.conditions.unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceProxy
// ---------------------------------------------------------------------------

/// Typed remote-method surface for one service.
pub struct ServiceProxy {
    service_name: String,
    cfg: CallConfig,
    consumer: Arc<ConsumerClient>,
    locals: Arc<LocalServiceRegistry>,
    conditions: Arc<ConditionEvaluator>,
}

impl ServiceProxy {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_key(&self) -> String {
        service_key(&self.service_name, &self.cfg.version, &self.cfg.group)
    }

    /// Synchronous surface: never raises for routine conditions.  Failures
    /// become the friendly value for `T`.
    pub async fn call<T>(&self, method: &str, parameters: Vec<Value>) -> T
    where
        T: DeserializeOwned + FriendlyReturn,
    {
        match self.call_value(method, parameters).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                T::friendly(&RpcError::Protocol(format!("decoding response data: {e}")))
            }),
            Err(err) => T::friendly(&err),
        }
    }

    /// Untyped core of the synchronous surface: the asynchronous surface
    /// awaited with the configured timeout.
    pub async fn call_value(&self, method: &str, parameters: Vec<Value>) -> Result<Value, RpcError> {
        let handle = self.invoke(method, parameters).await?;
        handle.wait(self.cfg.timeout).await
    }

    /// Asynchronous surface.
    ///
    /// The condition/local dispatch and the fallback step are shared with
    /// the synchronous surface; the surfaces differ only in how failures
    /// ultimately reach the caller (through the handle vs. as a friendly
    /// value).  A call the local path answered, or one whose send failed
    /// but was satisfied by the fallback, returns an already-resolved
    /// handle; a send failure with local service disabled surfaces here
    /// directly.
    pub async fn invoke(
        &self,
        method: &str,
        parameters: Vec<Value>,
    ) -> Result<CallHandle, RpcError> {
        let key = self.service_key();

        if let Some(result) = self.local_dispatch(&key, method, &parameters) {
            return Ok(CallHandle::ready(result));
        }

        match self.send_with_retries(method, &parameters).await {
            Ok(handle) => {
                let fallback = self.fallback_context(key, method, parameters);
                Ok(CallHandle::remote(handle, fallback))
            }
            Err(err) if self.cfg.enable_local_service => {
                warn!(service = %key, error = %err, "remote call failed, invoking local fallback");
                Ok(CallHandle::ready(self.run_fallback(&key, method, &parameters)))
            }
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn send_with_retries(
        &self,
        method: &str,
        parameters: &[Value],
    ) -> Result<ResponseHandle, RpcError> {
        let request = RpcRequest {
            service_name: self.service_name.clone(),
            method_name: method.to_owned(),
            parameter_types: parameters
                .iter()
                .map(|p| json_type_name(p).to_owned())
                .collect(),
            parameters: parameters.to_vec(),
            version: self.cfg.version.clone(),
            group: self.cfg.group.clone(),
        };

        let mut last = None;
        for attempt in 0..=self.cfg.retries {
            match self.consumer.send_request(request.clone()).await {
                Ok(handle) => return Ok(handle),
                // An empty lookup will not improve by retrying; fall back
                // (or surface) immediately.
                Err(err @ RpcError::ServiceNotFound(_)) => return Err(err),
                Err(err) => {
                    warn!(attempt, error = %err, service = %request.service_key(), "send failed");
                    last = Some(err);
                    if attempt < self.cfg.retries {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| RpcError::Transport("send attempts exhausted".to_owned())))
    }

    /// Shared first step of both surfaces: when local service is enabled
    /// and the condition selects the local path, dispatch to the local
    /// implementation.  A false condition without a local impl falls
    /// through to the remote path.
    fn local_dispatch(
        &self,
        key: &str,
        method: &str,
        parameters: &[Value],
    ) -> Option<Result<Value, RpcError>> {
        if !self.cfg.enable_local_service || self.conditions.evaluate(&self.cfg.condition) {
            return None;
        }
        let Some(local) = self.locals.get(key) else {
            debug!(service = %key, "local path selected but no local impl, using remote");
            return None;
        };
        debug!(service = %key, "condition selected local implementation");
        Some(
            local
                .invoke(method, parameters)
                .map_err(RpcError::LocalInvocation),
        )
    }

    fn run_fallback(&self, key: &str, method: &str, parameters: &[Value]) -> Result<Value, RpcError> {
        self.locals
            .get_with_fallback(key, &self.service_name)
            .invoke(method, parameters)
            .map_err(RpcError::LocalInvocation)
    }

    /// Context the handle needs to run the fallback step after the network
    /// wait; `None` when local service is disabled.
    fn fallback_context(
        &self,
        service_key: String,
        method: &str,
        parameters: Vec<Value>,
    ) -> Option<FallbackContext> {
        self.cfg.enable_local_service.then(|| FallbackContext {
            locals: self.locals.clone(),
            service_name: self.service_name.clone(),
            service_key,
            method: method.to_owned(),
            parameters,
        })
    }
}

// ---------------------------------------------------------------------------
// CallHandle
// ---------------------------------------------------------------------------

/// One in-flight façade call; resolves exactly once with the response data.
///
/// Wraps either a result the local path already produced, or the pending
/// network response plus (when local service is enabled) the context needed
/// to run the fallback step after a remote failure.  The fallback step thus
/// runs regardless of which surface issued the call.
pub struct CallHandle {
    inner: CallHandleInner,
}

enum CallHandleInner {
    /// Resolved before any network wait (local dispatch or send-stage
    /// fallback).
    Ready(Result<Value, RpcError>),
    Remote {
        handle: ResponseHandle,
        fallback: Option<FallbackContext>,
    },
}

impl CallHandle {
    fn ready(result: Result<Value, RpcError>) -> Self {
        CallHandle {
            inner: CallHandleInner::Ready(result),
        }
    }

    fn remote(handle: ResponseHandle, fallback: Option<FallbackContext>) -> Self {
        CallHandle {
            inner: CallHandleInner::Remote { handle, fallback },
        }
    }

    /// Await the result for at most `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<Value, RpcError> {
        match self.inner {
            CallHandleInner::Ready(result) => result,
            CallHandleInner::Remote { handle, fallback } => {
                match handle.wait(timeout).await {
                    Ok(response) => Ok(response.data),
                    Err(err) => match fallback {
                        Some(ctx) => {
                            warn!(service = %ctx.service_key, error = %err, "remote call failed, invoking local fallback");
                            ctx.run()
                        }
                        None => Err(err),
                    },
                }
            }
        }
    }
}

struct FallbackContext {
    locals: Arc<LocalServiceRegistry>,
    service_name: String,
    service_key: String,
    method: String,
    parameters: Vec<Value>,
}

impl FallbackContext {
    fn run(&self) -> Result<Value, RpcError> {
        self.locals
            .get_with_fallback(&self.service_key, &self.service_name)
            .invoke(&self.method, &self.parameters)
            .map_err(RpcError::LocalInvocation)
    }
}
