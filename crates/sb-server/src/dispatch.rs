//! Provider-side request dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use sb_core::ServiceHandler;
use sb_protocol::{codes, RpcRequest, RpcResponse, Status};
use tracing::warn;

/// Immutable map of service key → handler, built once at provider startup.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service_key: String, handler: Arc<dyn ServiceHandler>) {
        self.handlers.insert(service_key, handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke the handler for a request.  Every failure (unknown service,
    /// unknown method, handler error) becomes a FAIL response; nothing
    /// escapes to tear down the connection.
    pub fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let key = request.service_key();
        match self.handlers.get(&key) {
            None => RpcResponse::fail(format!("service not found: {key}")),
            Some(handler) => {
                match handler.invoke(&request.method_name, &request.parameters) {
                    Ok(data) => RpcResponse::success(data),
                    Err(message) => {
                        warn!(service = %key, method = %request.method_name, %message, "handler failed");
                        RpcResponse::fail(message)
                    }
                }
            }
        }
    }
}

/// Derive the envelope status from a response code.
///
/// Status is OK exactly when `code == 200` (value equality).  A response
/// with no code at all is coerced to a 500 FAIL with a warning.
pub fn finalize_response(mut response: RpcResponse) -> (Status, RpcResponse) {
    let status = match response.code {
        Some(code) if code == codes::RESPONSE_SUCCESS => Status::Ok,
        Some(_) => Status::Fail,
        None => {
            warn!("response carried no code, coercing to 500");
            response.code = Some(codes::RESPONSE_FAIL);
            Status::Fail
        }
    };
    (status, response)
}
