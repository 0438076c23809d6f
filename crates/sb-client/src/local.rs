//! Local and fallback service registries.
//!
//! Local implementations are keyed by service key, fallbacks by bare
//! service name.  When neither exists, a synthetic default stands in: it
//! resolves every method to JSON null, which the typed call surface turns
//! into the zero value for the declared return type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sb_core::ServiceHandler;
use sb_protocol::service_key;
use serde_json::Value;

/// Holder for local and fallback implementations.
#[derive(Default)]
pub struct LocalServiceRegistry {
    locals: Mutex<HashMap<String, Arc<dyn ServiceHandler>>>,
    fallbacks: Mutex<HashMap<String, Arc<dyn ServiceHandler>>>,
}

impl LocalServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local implementation for (name, version, group).
    pub fn register_local(
        &self,
        name: &str,
        version: &str,
        group: &str,
        handler: Arc<dyn ServiceHandler>,
    ) {
        self.locals
            .lock()
            .expect("local registry lock poisoned")
            .insert(service_key(name, version, group), handler);
    }

    /// Register a fallback implementation for a service name (any version).
    pub fn register_fallback(&self, name: &str, handler: Arc<dyn ServiceHandler>) {
        self.fallbacks
            .lock()
            .expect("fallback registry lock poisoned")
            .insert(name.to_owned(), handler);
    }

    /// The local implementation for `service_key`, if any.
    pub fn get(&self, service_key: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.locals
            .lock()
            .expect("local registry lock poisoned")
            .get(service_key)
            .cloned()
    }

    /// Local impl, else registered fallback, else the synthetic default.
    pub fn get_with_fallback(
        &self,
        service_key: &str,
        service_name: &str,
    ) -> Arc<dyn ServiceHandler> {
        if let Some(local) = self.get(service_key) {
            return local;
        }
        if let Some(fallback) = self
            .fallbacks
            .lock()
            .expect("fallback registry lock poisoned")
            .get(service_name)
            .cloned()
        {
            return fallback;
        }
        Arc::new(ZeroValueService)
    }
}

/// Synthetic default: every method resolves to null.
struct ZeroValueService;

impl ServiceHandler for ZeroValueService {
    fn invoke(&self, _method: &str, _parameters: &[Value]) -> Result<Value, String> {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::handler_fn;
    use serde_json::json;

    #[test]
    fn local_lookup_is_by_full_service_key() {
        let registry = LocalServiceRegistry::new();
        registry.register_local("Echo", "1.0.0", "", handler_fn(|_, _| Ok(json!("local"))));

        assert!(registry.get("Echo_1.0.0_").is_some());
        assert!(registry.get("Echo_2.0.0_").is_none());
    }

    #[test]
    fn fallback_is_by_service_name() {
        let registry = LocalServiceRegistry::new();
        registry.register_fallback("Echo", handler_fn(|_, _| Ok(json!("fallback"))));

        let handler = registry.get_with_fallback("Echo_9.9.9_", "Echo");
        assert_eq!(handler.invoke("anything", &[]).unwrap(), json!("fallback"));
    }

    #[test]
    fn local_wins_over_fallback() {
        let registry = LocalServiceRegistry::new();
        registry.register_local("Echo", "1.0.0", "", handler_fn(|_, _| Ok(json!("local"))));
        registry.register_fallback("Echo", handler_fn(|_, _| Ok(json!("fallback"))));

        let handler = registry.get_with_fallback("Echo_1.0.0_", "Echo");
        assert_eq!(handler.invoke("m", &[]).unwrap(), json!("local"));
    }

    #[test]
    fn synthetic_default_returns_null_for_every_method() {
        let registry = LocalServiceRegistry::new();
        let handler = registry.get_with_fallback("Nope_1.0.0_", "Nope");
        assert_eq!(handler.invoke("whatever", &[json!(1)]).unwrap(), Value::Null);
    }
}
