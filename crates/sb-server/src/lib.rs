// sb-server: the provider side of the switchboard RPC framework.
//
// A provider binds a TCP listener, dispatches decoded requests into its
// handler table, answers heartbeats, and keeps itself registered with the
// registry through a heartbeat-enabled registry client.

pub mod dispatch;
pub mod server;

pub use dispatch::{finalize_response, HandlerTable};
pub use server::{ProviderBuilder, ProviderServer};
