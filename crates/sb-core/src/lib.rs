// sb-core: shared session plane for the switchboard RPC framework.
//
// Everything both sides of a link need lives here: the single-shot response
// awaiter, the pending-request map keyed by request id, the framed TCP
// client connection with its response demultiplexer, the registry client
// (with heartbeat/reconnect supervision), the service dispatch trait, and
// configuration loading.

pub mod awaiter;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod net;
pub mod registry_client;

pub use awaiter::{Awaiter, PendingRequests, RequestIds};
pub use config::{load_config_from_path, load_config_from_str, ConfigError, RpcConfig};
pub use connection::ClientConnection;
pub use error::RpcError;
pub use handler::{handler_fn, ServiceHandler};
pub use registry_client::{RegistryClient, RegistryClientConfig, DEFAULT_TIMEOUT};
