//! Registry client session.
//!
//! Holds one TCP session to the registry for the life of the holder.
//! Providers enable the heartbeat: a 5 s supervision task that PINGs the
//! registry, detects dead sessions, reconnects (10 attempts, 3 s apart,
//! 5 s deadline each) and replays every cached registration in
//! registration order.  Consumers leave the heartbeat off and reconnect
//! lazily on use.

use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sb_protocol::{LookupRequest, Message, Payload, RegistryReply, ServiceInfo};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connection::ClientConnection;
use crate::error::RpcError;

/// Upper bound on a blocking registry call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(3);
const CONNECT_DEADLINE: Duration = Duration::from_secs(5);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const HEARTBEAT_FAILURE_WARNING: u32 = 3;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for a registry session.
#[derive(Debug, Clone)]
pub struct RegistryClientConfig {
    /// Registry `host:port`.
    pub address: String,
    /// Providers enable this; consumers leave it off.
    pub enable_heartbeat: bool,
    /// Per-call wait bound for register/unregister/lookup/ping.
    pub call_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub connect_attempts: u32,
    pub connect_retry_interval: Duration,
    pub connect_deadline: Duration,
}

impl RegistryClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        RegistryClientConfig {
            address: address.into(),
            enable_heartbeat: false,
            call_timeout: DEFAULT_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            connect_attempts: CONNECT_ATTEMPTS,
            connect_retry_interval: CONNECT_RETRY_INTERVAL,
            connect_deadline: CONNECT_DEADLINE,
        }
    }

    pub fn with_heartbeat(address: impl Into<String>) -> Self {
        RegistryClientConfig {
            enable_heartbeat: true,
            ..Self::new(address)
        }
    }
}

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connected,
    HeartbeatFailing,
    Reconnecting,
}

fn transition(state: &mut SessionState, next: SessionState) {
    if *state != next {
        info!(from = ?*state, to = ?next, "registry session state");
        *state = next;
    }
}

// ---------------------------------------------------------------------------
// RegistryClient
// ---------------------------------------------------------------------------

/// A resilient client session to the registry.
pub struct RegistryClient {
    cfg: RegistryClientConfig,
    conn: tokio::sync::Mutex<Option<Arc<ClientConnection>>>,
    /// Everything successfully registered through this client, in
    /// registration order; replayed verbatim after a reconnect.
    registered: Mutex<Vec<ServiceInfo>>,
    closed: AtomicBool,
    heartbeat: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RegistryClient {
    /// Connect (with the retry policy) and start the heartbeat supervisor
    /// when enabled.
    pub async fn connect(cfg: RegistryClientConfig) -> Result<Arc<Self>, RpcError> {
        let first = dial_with_retry(&cfg).await?;
        let client = Arc::new(RegistryClient {
            cfg,
            conn: tokio::sync::Mutex::new(Some(first)),
            registered: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        });

        if client.cfg.enable_heartbeat {
            let weak = Arc::downgrade(&client);
            let interval = client.cfg.heartbeat_interval;
            let handle = tokio::spawn(heartbeat_loop(weak, interval));
            *client.heartbeat.lock().expect("heartbeat slot poisoned") = Some(handle);
        }

        Ok(client)
    }

    /// Register `info` and remember it for reconnect replay.
    pub async fn register(&self, info: ServiceInfo) -> Result<(), RpcError> {
        let conn = self.session().await?;
        let awaiter = conn
            .request(|id| Message::register(id, info.clone()))
            .await?;
        expect_ack(awaiter.wait(self.cfg.call_timeout).await?)?;

        let mut cache = self.registered.lock().expect("registered cache poisoned");
        let duplicate = cache
            .iter()
            .any(|s| s.address == info.address && s.service_key() == info.service_key());
        if !duplicate {
            cache.push(info);
        }
        Ok(())
    }

    /// Unregister `info` and forget it locally.
    pub async fn unregister(&self, info: &ServiceInfo) -> Result<(), RpcError> {
        let conn = self.session().await?;
        let awaiter = conn
            .request(|id| Message::unregister(id, info.clone()))
            .await?;
        expect_ack(awaiter.wait(self.cfg.call_timeout).await?)?;

        self.registered
            .lock()
            .expect("registered cache poisoned")
            .retain(|s| !(s.address == info.address && s.service_key() == info.service_key()));
        Ok(())
    }

    /// Look up the providers for (name, version, group).
    pub async fn lookup(
        &self,
        service_name: &str,
        version: &str,
        group: &str,
    ) -> Result<Vec<ServiceInfo>, RpcError> {
        let request = LookupRequest {
            service_name: service_name.to_owned(),
            version: version.to_owned(),
            group: group.to_owned(),
        };
        let conn = self.session().await?;
        let awaiter = conn
            .request(|id| Message::lookup(id, request.clone()))
            .await?;
        let msg = awaiter.wait(self.cfg.call_timeout).await?;
        match msg.payload {
            Payload::RegistryReply(RegistryReply::Services(list)) => Ok(list),
            Payload::RegistryReply(RegistryReply::Ack) => Ok(Vec::new()),
            Payload::RegistryReply(RegistryReply::Error(m)) => Err(RpcError::Registry(m)),
            other => Err(RpcError::Protocol(format!(
                "unexpected reply type {} to lookup",
                other.type_code()
            ))),
        }
    }

    /// Snapshot of the local registration cache, in registration order.
    pub fn registered_services(&self) -> Vec<ServiceInfo> {
        self.registered
            .lock()
            .expect("registered cache poisoned")
            .clone()
    }

    /// Gracefully unregister everything this client registered, then close.
    /// Idempotent; later calls are no-ops.
    pub async fn destroy(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.heartbeat.lock().expect("heartbeat slot poisoned").take() {
            handle.abort();
        }

        let infos: Vec<ServiceInfo> = self
            .registered
            .lock()
            .expect("registered cache poisoned")
            .drain(..)
            .collect();
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            if conn.is_active() {
                for info in infos {
                    let outcome = async {
                        let awaiter = conn
                            .request(|id| Message::unregister(id, info.clone()))
                            .await?;
                        expect_ack(awaiter.wait(self.cfg.call_timeout).await?)
                    }
                    .await;
                    if let Err(e) = outcome {
                        warn!(service = %info.service_key(), error = %e, "unregister on destroy failed");
                    }
                }
            }
            conn.close().await;
        }
        debug!(registry = %self.cfg.address, "registry client destroyed");
    }

    // -----------------------------------------------------------------------
    // Session management
    // -----------------------------------------------------------------------

    async fn current(&self) -> Option<Arc<ClientConnection>> {
        let guard = self.conn.lock().await;
        guard.as_ref().filter(|c| c.is_active()).cloned()
    }

    /// The active session, dialing a fresh one (full retry policy) when the
    /// previous one has died.  Reconnection here does not replay
    /// registrations; that is the heartbeat supervisor's job.
    async fn session(&self) -> Result<Arc<ClientConnection>, RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ConnectionClosed);
        }
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            if conn.is_active() {
                return Ok(conn.clone());
            }
        }
        let fresh = dial_with_retry(&self.cfg).await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    async fn ping(&self) -> Result<(), RpcError> {
        let conn = self.current().await.ok_or(RpcError::ConnectionClosed)?;
        let awaiter = conn.request(Message::ping).await?;
        let msg = awaiter.wait(self.cfg.call_timeout).await?;
        match msg.payload {
            Payload::HeartbeatPong => Ok(()),
            other => Err(RpcError::Protocol(format!(
                "expected PONG, got type {}",
                other.type_code()
            ))),
        }
    }

    /// Dial a fresh session and re-register every cached service in order.
    /// Individual replay failures are logged, never fatal.
    async fn reconnect_and_replay(&self) -> Result<(), RpcError> {
        let fresh = dial_with_retry(&self.cfg).await?;
        {
            let mut guard = self.conn.lock().await;
            if let Some(old) = guard.take() {
                old.close().await;
            }
            *guard = Some(fresh.clone());
        }

        let snapshot = self.registered_services();
        info!(services = snapshot.len(), "replaying registrations after reconnect");
        for info in snapshot {
            let outcome = async {
                let awaiter = fresh
                    .request(|id| Message::register(id, info.clone()))
                    .await?;
                expect_ack(awaiter.wait(self.cfg.call_timeout).await?)
            }
            .await;
            if let Err(e) = outcome {
                warn!(service = %info.service_key(), error = %e, "re-register failed");
            }
        }
        Ok(())
    }
}

fn expect_ack(msg: Message) -> Result<(), RpcError> {
    match msg.payload {
        Payload::RegistryReply(RegistryReply::Error(m)) => Err(RpcError::Registry(m)),
        Payload::RegistryReply(_) => Ok(()),
        other => Err(RpcError::Protocol(format!(
            "unexpected reply type {}",
            other.type_code()
        ))),
    }
}

async fn dial_with_retry(cfg: &RegistryClientConfig) -> Result<Arc<ClientConnection>, RpcError> {
    let mut last = None;
    for attempt in 1..=cfg.connect_attempts {
        match ClientConnection::dial(&cfg.address, cfg.connect_deadline).await {
            Ok(conn) => {
                if attempt > 1 {
                    info!(attempt, registry = %cfg.address, "registry connected");
                }
                return Ok(conn);
            }
            Err(e) => {
                warn!(attempt, max = cfg.connect_attempts, error = %e, "registry dial failed");
                last = Some(e);
                if attempt < cfg.connect_attempts {
                    tokio::time::sleep(cfg.connect_retry_interval).await;
                }
            }
        }
    }
    Err(last.unwrap_or_else(|| RpcError::Transport("registry unreachable".to_owned())))
}

/// Heartbeat supervisor: PING on a timer, reconnect + replay on dead
/// sessions.  Holds only a weak reference so a dropped client stops its
/// own supervision.
async fn heartbeat_loop(weak: Weak<RegistryClient>, interval: Duration) {
    let mut failures = 0u32;
    let mut state = SessionState::Connected;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(client) = weak.upgrade() else { break };
        if client.closed.load(Ordering::SeqCst) {
            break;
        }

        if client.current().await.is_none() {
            transition(&mut state, SessionState::Reconnecting);
            match client.reconnect_and_replay().await {
                Ok(()) => {
                    failures = 0;
                    transition(&mut state, SessionState::Connected);
                }
                Err(e) => {
                    warn!(error = %e, "registry reconnect failed, retrying next tick");
                }
            }
            continue;
        }

        match client.ping().await {
            Ok(()) => {
                failures = 0;
                transition(&mut state, SessionState::Connected);
            }
            Err(e) => {
                failures += 1;
                transition(&mut state, SessionState::HeartbeatFailing);
                if failures >= HEARTBEAT_FAILURE_WARNING {
                    warn!(failures, error = %e, "consecutive registry heartbeat failures");
                } else {
                    debug!(failures, error = %e, "registry heartbeat failed");
                }
            }
        }
    }
}
