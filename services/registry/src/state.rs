//! Registry tables.
//!
//! Two maps under one lock: the service table (service key → ordered
//! providers, unique by address) and the heartbeat table (address →
//! last-seen instant).  Holding both under the same lock makes every
//! mutation atomic with respect to concurrent lookups, and keeps the
//! invariant that every live service entry has a heartbeat entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sb_protocol::{service_key, unknown_service_key, ServiceInfo};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Timing knobs for the registry.  The defaults are the production values;
/// tests shrink them to run in milliseconds.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often the expiry sweeper runs.
    pub sweep_interval: Duration,
    /// An address silent for longer than this is expired.
    pub heartbeat_ttl: Duration,
    /// Sessions with no inbound traffic for this long are closed.
    pub reader_idle: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            sweep_interval: Duration::from_secs(10),
            heartbeat_ttl: Duration::from_secs(120),
            reader_idle: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    /// service key → providers in registration order, unique by address.
    services: HashMap<String, Vec<ServiceInfo>>,
    /// provider address (`host:port`) → last heartbeat.
    heartbeats: HashMap<String, Instant>,
}

/// Shared, concurrency-safe registry state.
#[derive(Clone, Default)]
pub struct RegistryState {
    inner: Arc<Mutex<Tables>>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider.  Registering is idempotent per address, and
    /// doubles as a heartbeat for that address.  Returns the service key
    /// the entry was filed under.
    pub fn register(&self, info: ServiceInfo) -> String {
        let key = if info.service_name.is_empty() {
            unknown_service_key(&info.address)
        } else {
            info.service_key()
        };

        let mut tables = self.lock();
        let entries = tables.services.entry(key.clone()).or_default();
        if !entries.iter().any(|e| e.address == info.address) {
            entries.push(info.clone());
        }
        tables.heartbeats.insert(info.address, Instant::now());
        key
    }

    /// Remove a provider's entries for this service.  The heartbeat entry
    /// survives while any other service still references the address.
    pub fn unregister(&self, info: &ServiceInfo) {
        let key = if info.service_name.is_empty() {
            unknown_service_key(&info.address)
        } else {
            info.service_key()
        };

        let mut tables = self.lock();
        if let Some(entries) = tables.services.get_mut(&key) {
            entries.retain(|e| e.address != info.address);
            if entries.is_empty() {
                tables.services.remove(&key);
            }
        }
        let still_referenced = tables
            .services
            .values()
            .any(|entries| entries.iter().any(|e| e.address == info.address));
        if !still_referenced {
            tables.heartbeats.remove(&info.address);
        }
    }

    /// Snapshot of the providers for (name, version, group).  Missing keys
    /// yield an empty list, never an error.
    pub fn lookup(&self, name: &str, version: &str, group: &str) -> Vec<ServiceInfo> {
        self.lock()
            .services
            .get(&service_key(name, version, group))
            .cloned()
            .unwrap_or_default()
    }

    /// Refresh (or create) the heartbeat entry for `address`.
    pub fn heartbeat(&self, address: &str) {
        self.lock().heartbeats.insert(address.to_owned(), Instant::now());
    }

    /// Expire every address silent for longer than `ttl`, removing it from
    /// both tables.  Returns the expired addresses.
    pub fn sweep(&self, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut tables = self.lock();
        let expired: Vec<String> = tables
            .heartbeats
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) > ttl)
            .map(|(address, _)| address.clone())
            .collect();

        for address in &expired {
            tables.heartbeats.remove(address);
        }
        if !expired.is_empty() {
            tables.services.retain(|_, entries| {
                entries.retain(|e| !expired.contains(&e.address));
                !entries.is_empty()
            });
        }
        expired
    }

    /// Number of distinct service keys (test/observability helper).
    pub fn service_key_count(&self) -> usize {
        self.lock().services.len()
    }

    /// Number of tracked heartbeat addresses (test/observability helper).
    pub fn heartbeat_count(&self) -> usize {
        self.lock().heartbeats.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.inner.lock().expect("registry state lock poisoned")
    }
}
