// switchboard: an RPC framework with a registry, providers and consumers
// over a length-prefixed JSON wire protocol on persistent TCP connections.
//
// This crate is the single-import surface; the implementation lives in the
// workspace crates re-exported below.

pub use sb_client::{
    CallConfig, CallHandle, ConditionEvaluator, ConsumerClient, FriendlyReturn,
    LocalServiceRegistry, ProxyBuilder, ResponseHandle, ServiceProxy,
};
pub use sb_core::{
    handler_fn, load_config_from_path, load_config_from_str, ClientConnection, ConfigError,
    RegistryClient, RegistryClientConfig, RpcConfig, RpcError, ServiceHandler, DEFAULT_TIMEOUT,
};
pub use sb_protocol::{
    codes, service_key, unknown_service_key, CodecError, LookupRequest, Message, MessageCodec,
    MessageType, Payload, RegistryReply, RpcRequest, RpcResponse, ServiceInfo, Status,
    MAX_FRAME_SIZE,
};
pub use sb_server::{ProviderBuilder, ProviderServer};
