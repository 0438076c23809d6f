//! Registry TCP server.
//!
//! Accepts framed sessions, dispatches registry operations against the
//! shared [`RegistryState`], and runs the expiry sweeper.  Handler failures
//! are answered with `REG_RESPONSE status=FAIL` and never close the
//! session; only fatal framing errors, reader idleness, or the peer going
//! away end a session.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use sb_protocol::{CodecError, Message, MessageCodec, Payload};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::state::{RegistryConfig, RegistryState};

/// A running registry instance.
pub struct RegistryServer {
    local_addr: SocketAddr,
    state: RegistryState,
    shutdown_tx: watch::Sender<bool>,
}

impl RegistryServer {
    /// Bind the listener and start the accept loop and expiry sweeper.
    pub async fn bind(bind_addr: &str, cfg: RegistryConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "registry listening");

        let state = RegistryState::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            cfg.clone(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(sweeper(state.clone(), cfg, shutdown_rx));

        Ok(RegistryServer {
            local_addr,
            state,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &RegistryState {
        &self.state
    }

    /// Stop accepting, close sessions, cancel the sweeper.  The listener
    /// socket is released so the port can be rebound.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for RegistryServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Accept loop and sweeper
// ---------------------------------------------------------------------------

async fn accept_loop(
    listener: TcpListener,
    state: RegistryState,
    cfg: RegistryConfig,
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
                        debug!(%peer, "session accepted");
                        tokio::spawn(handle_session(
                            stream,
                            peer,
                            state.clone(),
                            cfg.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                }
            }
        }
    }
    debug!("registry accept loop stopped");
}

async fn sweeper(state: RegistryState, cfg: RegistryConfig, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(cfg.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
            }
            _ = ticker.tick() => {
                let removed = state.sweep(cfg.heartbeat_ttl);
                if !removed.is_empty() {
                    info!(addresses = ?removed, "expired providers removed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session handling
// ---------------------------------------------------------------------------

async fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    state: RegistryState,
    cfg: RegistryConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, MessageCodec::default());
    // Advertised addresses registered over this session; a bare PING
    // refreshes exactly these.  Dies with the session.
    let mut session_addresses: Vec<String> = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
                continue;
            }
            next = tokio::time::timeout(cfg.reader_idle, framed.next()) => next,
        };

        match next {
            Err(_) => {
                debug!(%peer, "reader idle, closing session");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) if e.is_fatal() => {
                warn!(%peer, error = %e, "fatal framing error, closing session");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(%peer, error = %e, "decode failure");
                let reply = Message::registry_err(0, format!("decode failure: {e}"));
                if framed.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Some(Ok(msg))) => {
                if dispatch(&mut framed, msg, peer, &state, &mut session_addresses)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
    debug!(%peer, "session closed");
}

async fn dispatch(
    framed: &mut Framed<TcpStream, MessageCodec>,
    msg: Message,
    peer: SocketAddr,
    state: &RegistryState,
    session_addresses: &mut Vec<String>,
) -> Result<(), CodecError> {
    let request_id = msg.request_id;
    match msg.payload {
        Payload::Register(info) => {
            let address = info.address.clone();
            let key = state.register(info);
            if !session_addresses.contains(&address) {
                session_addresses.push(address.clone());
            }
            debug!(%peer, %key, %address, "service registered");
            framed.send(Message::registry_ok(request_id)).await
        }
        Payload::Unregister(info) => {
            state.unregister(&info);
            session_addresses.retain(|a| a != &info.address);
            debug!(%peer, address = %info.address, "service unregistered");
            framed.send(Message::registry_ok(request_id)).await
        }
        Payload::Lookup(request) => {
            let services = state.lookup(&request.service_name, &request.version, &request.group);
            debug!(%peer, key = %request.service_key(), hits = services.len(), "lookup");
            framed
                .send(Message::registry_services(request_id, services))
                .await
        }
        Payload::HeartbeatPing => {
            if session_addresses.is_empty() {
                // Nothing registered on this session yet; key by the
                // observed remote endpoint.
                state.heartbeat(&peer.to_string());
            } else {
                for address in session_addresses.iter() {
                    state.heartbeat(address);
                }
            }
            framed.send(Message::pong(request_id)).await
        }
        Payload::Unknown { type_code, .. } => {
            warn!(%peer, type_code, "unknown message type discarded");
            Ok(())
        }
        other => {
            warn!(%peer, type_code = other.type_code(), "unexpected message type");
            framed
                .send(Message::registry_err(
                    request_id,
                    format!("unsupported message type {}", other.type_code()),
                ))
                .await
        }
    }
}
