// registry: the switchboard service registry.
//
// Volatile by design: every table is in memory and is rebuilt from provider
// re-registration after a restart.

pub mod server;
pub mod state;

pub use server::RegistryServer;
pub use state::{RegistryConfig, RegistryState};
