//! A framed TCP client session with response demultiplexing.
//!
//! One `ClientConnection` backs one persistent link: consumer→provider or
//! client→registry.  Outbound messages are written whole (length prefix and
//! payload in one flush); a background reader task routes every inbound
//! RESPONSE / REG_RESPONSE / HEARTBEAT_RESP to the pending entry with the
//! matching request id.  When the link drops, every pending entry is
//! completed exceptionally with a connection-closed error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sb_protocol::{Message, MessageCodec, Payload};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, warn};

use crate::awaiter::{Awaiter, PendingRequests, RequestIds};
use crate::error::RpcError;

type FramedStream = Framed<TcpStream, MessageCodec>;

/// An active framed session to one peer address.
#[derive(Debug)]
pub struct ClientConnection {
    addr: String,
    ids: RequestIds,
    pending: PendingRequests,
    writer: tokio::sync::Mutex<SplitSink<FramedStream, Message>>,
    active: Arc<AtomicBool>,
}

impl ClientConnection {
    /// Dial `addr` with a connect deadline and start the reader task.
    pub async fn dial(addr: &str, connect_timeout: Duration) -> Result<Arc<Self>, RpcError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::Transport(format!("connect to {addr} timed out")))?
            .map_err(|e| RpcError::Transport(format!("connect to {addr}: {e}")))?;
        Ok(Self::start(stream, addr))
    }

    fn start(stream: TcpStream, addr: &str) -> Arc<Self> {
        let framed = Framed::new(stream, MessageCodec::default());
        let (sink, read_half) = framed.split();
        let pending = PendingRequests::new();
        let active = Arc::new(AtomicBool::new(true));

        let conn = Arc::new(ClientConnection {
            addr: addr.to_owned(),
            ids: RequestIds::default(),
            pending: pending.clone(),
            writer: tokio::sync::Mutex::new(sink),
            active: active.clone(),
        });

        tokio::spawn(read_loop(read_half, pending, active, addr.to_owned()));
        conn
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// False once the reader task has observed EOF or a fatal error, or
    /// after `close()`.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Write one message; a failed write marks the session inactive.
    pub async fn send(&self, msg: Message) -> Result<(), RpcError> {
        let mut writer = self.writer.lock().await;
        writer.send(msg).await.map_err(|e| {
            self.active.store(false, Ordering::Release);
            RpcError::Transport(format!("write to {}: {e}", self.addr))
        })
    }

    /// Assign the next request id, park a pending awaiter, and write the
    /// message produced by `build`.
    ///
    /// A terminal send failure removes the pending entry before the error
    /// reaches the caller, so no orphan awaiters accumulate.
    pub async fn request(
        &self,
        build: impl FnOnce(u64) -> Message,
    ) -> Result<Awaiter, RpcError> {
        let request_id = self.ids.next();
        let awaiter = self.pending.install(request_id);
        if let Err(e) = self.send(build(request_id)).await {
            self.pending.remove(request_id);
            return Err(e);
        }
        Ok(awaiter)
    }

    /// Close the session.  Idempotent; pending entries are failed by the
    /// reader task as it observes the stream end.
    pub async fn close(&self) {
        self.active.store(false, Ordering::Release);
        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
    }
}

/// Inbound demultiplexer: one task per connection.
async fn read_loop(
    mut read_half: SplitStream<FramedStream>,
    pending: PendingRequests,
    active: Arc<AtomicBool>,
    addr: String,
) {
    loop {
        match read_half.next().await {
            None => break,
            Some(Err(e)) if e.is_fatal() => {
                error!(peer = %addr, error = %e, "fatal decode error, dropping session");
                break;
            }
            Some(Err(e)) => {
                // Frame consumed; the stream keeps going.
                warn!(peer = %addr, error = %e, "malformed frame dropped");
            }
            Some(Ok(msg)) => {
                let request_id = msg.request_id;
                match msg.payload {
                    Payload::Response(_) | Payload::RegistryReply(_) | Payload::HeartbeatPong => {
                        if !pending.complete(request_id, Ok(msg)) {
                            warn!(peer = %addr, request_id, "response for unknown request id dropped");
                        }
                    }
                    Payload::Unknown { type_code, .. } => {
                        warn!(peer = %addr, type_code, "unknown message type discarded");
                    }
                    other => {
                        debug!(peer = %addr, type_code = other.type_code(), "unexpected inbound message ignored");
                    }
                }
            }
        }
    }
    active.store(false, Ordering::Release);
    pending.fail_all(&RpcError::ConnectionClosed);
    debug!(peer = %addr, "session reader finished");
}
