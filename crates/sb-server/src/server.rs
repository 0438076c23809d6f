//! Provider server and bootstrap.
//!
//! Providers are wired explicitly through the builder: implementations are
//! registered with their (name, version, group), keyed into the handler
//! table, and advertised to the registry as `host:port` once the listener
//! is bound.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sb_core::{net, RegistryClient, RegistryClientConfig, RpcError, ServiceHandler};
use sb_protocol::{
    service_key, CodecError, Message, MessageCodec, Payload, RpcResponse, ServiceInfo, Status,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::dispatch::{finalize_response, HandlerTable};

const DEFAULT_PORT: u16 = 9000;
const READER_IDLE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct Registration {
    name: String,
    version: String,
    group: String,
    handler: Arc<dyn ServiceHandler>,
}

/// Bootstrap for a provider process.
pub struct ProviderBuilder {
    registry_address: String,
    ip: Option<String>,
    port: u16,
    reader_idle: Duration,
    registry_config: Option<RegistryClientConfig>,
    registrations: Vec<Registration>,
}

impl ProviderBuilder {
    pub fn new(registry_address: impl Into<String>) -> Self {
        ProviderBuilder {
            registry_address: registry_address.into(),
            ip: None,
            port: DEFAULT_PORT,
            reader_idle: READER_IDLE,
            registry_config: None,
            registrations: Vec::new(),
        }
    }

    /// Build from a loaded framework config.
    pub fn from_config(cfg: &sb_core::RpcConfig) -> Self {
        let mut builder = Self::new(cfg.registry_address.clone());
        builder.ip = cfg.server_ip.clone();
        builder.port = cfg.server_port;
        builder
    }

    /// Bind/advertise IP.  Defaults to the auto-detected LAN address.
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Listen port.  Port 0 binds an ephemeral port (useful in tests); the
    /// advertised address always carries the actually bound port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn reader_idle(mut self, idle: Duration) -> Self {
        self.reader_idle = idle;
        self
    }

    /// Override the registry session parameters (heartbeat stays enabled).
    pub fn registry_client_config(mut self, cfg: RegistryClientConfig) -> Self {
        self.registry_config = Some(cfg);
        self
    }

    /// Register a service under the default version "1.0.0" and empty group.
    pub fn service(self, name: impl Into<String>, handler: Arc<dyn ServiceHandler>) -> Self {
        self.service_versioned(name, "1.0.0", "", handler)
    }

    pub fn service_versioned(
        mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Self {
        self.registrations.push(Registration {
            name: name.into(),
            version: version.into(),
            group: group.into(),
            handler,
        });
        self
    }

    /// Bind, start serving, and register every service with the registry.
    pub async fn serve(self) -> Result<ProviderServer, RpcError> {
        let ip = self
            .ip
            .clone()
            .or_else(|| net::local_lan_ip().map(|ip| ip.to_string()))
            .unwrap_or_else(|| "127.0.0.1".to_owned());

        let listener = TcpListener::bind(format!("{ip}:{}", self.port))
            .await
            .map_err(|e| RpcError::Transport(format!("bind {ip}:{}: {e}", self.port)))?;
        let local_addr = listener.local_addr().map_err(RpcError::transport)?;
        let address = format!("{ip}:{}", local_addr.port());

        let mut table = HandlerTable::new();
        for r in &self.registrations {
            table.insert(service_key(&r.name, &r.version, &r.group), r.handler.clone());
        }
        let handlers = Arc::new(table);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(
            listener,
            handlers,
            self.reader_idle,
            shutdown_rx,
        ));

        // Providers keep their registry session alive with heartbeats; the
        // session also replays these registrations after a reconnect.
        let registry_cfg = self
            .registry_config
            .unwrap_or_else(|| RegistryClientConfig::with_heartbeat(&self.registry_address));
        let registry = RegistryClient::connect(registry_cfg).await?;
        for r in &self.registrations {
            registry
                .register(ServiceInfo::new(&r.name, &r.version, &r.group, &address))
                .await?;
        }

        info!(%address, services = self.registrations.len(), "provider serving");
        Ok(ProviderServer {
            local_addr,
            address,
            registry,
            shutdown_tx,
        })
    }
}

// ---------------------------------------------------------------------------
// Server handle
// ---------------------------------------------------------------------------

/// A running provider.
pub struct ProviderServer {
    local_addr: SocketAddr,
    address: String,
    registry: Arc<RegistryClient>,
    shutdown_tx: watch::Sender<bool>,
}

impl ProviderServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The advertised `host:port`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn registry(&self) -> &Arc<RegistryClient> {
        &self.registry
    }

    /// Unregister everything and stop accepting.  Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.registry.destroy().await;
        info!(address = %self.address, "provider stopped");
    }
}

impl Drop for ProviderServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

async fn accept_loop(
    listener: TcpListener,
    handlers: Arc<HandlerTable>,
    reader_idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        debug!(%peer, "consumer connected");
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            handlers.clone(),
                            reader_idle,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                }
            }
        }
    }
    debug!("provider accept loop stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handlers: Arc<HandlerTable>,
    reader_idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, MessageCodec::default());
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
                continue;
            }
            next = tokio::time::timeout(reader_idle, framed.next()) => next,
        };

        match next {
            Err(_) => {
                debug!(%peer, "reader idle, closing connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) if e.is_fatal() => {
                warn!(%peer, error = %e, "fatal framing error, closing connection");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(%peer, error = %e, "malformed frame dropped");
            }
            Ok(Some(Ok(msg))) => {
                if dispatch_message(&mut framed, msg, peer, &handlers).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(%peer, "consumer connection closed");
}

async fn dispatch_message(
    framed: &mut Framed<TcpStream, MessageCodec>,
    msg: Message,
    peer: SocketAddr,
    handlers: &HandlerTable,
) -> Result<(), CodecError> {
    let request_id = msg.request_id;
    match msg.payload {
        Payload::Request(request) => {
            debug!(
                %peer,
                service = %request.service_name,
                method = %request.method_name,
                request_id,
                "request"
            );
            let (status, response) = finalize_response(handlers.dispatch(&request));
            framed
                .send(Message::response(request_id, status, response))
                .await
        }
        Payload::HeartbeatPing => framed.send(Message::pong(request_id)).await,
        Payload::Unknown { type_code, .. } => {
            warn!(%peer, type_code, "unknown message type discarded");
            Ok(())
        }
        other => {
            warn!(%peer, type_code = other.type_code(), "unexpected message type");
            let response = RpcResponse::fail(format!(
                "unsupported message type {}",
                other.type_code()
            ));
            framed
                .send(Message::response(request_id, Status::Fail, response))
                .await
        }
    }
}
