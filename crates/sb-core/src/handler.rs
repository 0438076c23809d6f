//! Method dispatch adapters.
//!
//! Instead of reflective dispatch on a service object, a provider (or the
//! local-service resolver) registers one [`ServiceHandler`] per service
//! key.  The handler maps a method name plus positional JSON parameters to
//! a JSON result or an error message; the surrounding layer turns the
//! outcome into an `RpcResponse`.

use std::sync::Arc;

use serde_json::Value;

/// One registered service implementation's dispatch surface.
pub trait ServiceHandler: Send + Sync {
    /// Invoke `method` with positional parameters.
    ///
    /// `Err` carries a human-readable message; the caller converts it to a
    /// FAIL response (remote side) or a local-invocation error (local side).
    fn invoke(&self, method: &str, parameters: &[Value]) -> Result<Value, String>;
}

struct FnHandler<F>(F);

impl<F> ServiceHandler for FnHandler<F>
where
    F: Fn(&str, &[Value]) -> Result<Value, String> + Send + Sync,
{
    fn invoke(&self, method: &str, parameters: &[Value]) -> Result<Value, String> {
        (self.0)(method, parameters)
    }
}

/// Wrap a closure as a [`ServiceHandler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn ServiceHandler>
where
    F: Fn(&str, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_handlers_dispatch_by_method() {
        let handler = handler_fn(|method, params| match method {
            "echo" => Ok(params.first().cloned().unwrap_or(Value::Null)),
            other => Err(format!("no such method: {other}")),
        });

        assert_eq!(
            handler.invoke("echo", &[serde_json::json!("hi")]).unwrap(),
            serde_json::json!("hi")
        );
        assert!(handler.invoke("nope", &[]).is_err());
    }
}
