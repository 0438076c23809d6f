//! Framework configuration loading.
//!
//! TOML is the sole config source.  Keys mirror the documented property
//! paths as dotted TOML tables:
//!
//! ```toml
//! [rpc.registry]
//! address = "10.0.0.2:8000"       # required
//!
//! [rpc.server]
//! ip = "10.0.0.5"                 # optional; default auto-detected LAN address
//! port = 9000                     # optional
//! "use.simple.json" = true        # accepted, ignored
//!
//! [rpc.client]
//! timeout = 5000                  # ms, optional
//! "use.simple.json" = true        # accepted, ignored
//! ```

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Validated framework configuration.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Registry `host:port`.
    pub registry_address: String,
    /// Provider bind/advertise IP; `None` means auto-detect.
    pub server_ip: Option<String>,
    /// Provider listen port.
    pub server_port: u16,
    /// Default consumer call timeout in milliseconds.
    pub client_timeout_ms: u64,
}

impl RpcConfig {
    /// Programmatic config with the documented defaults.
    pub fn new(registry_address: impl Into<String>) -> Self {
        RpcConfig {
            registry_address: registry_address.into(),
            server_ip: None,
            server_port: 9000,
            client_timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    rpc: Option<RawRpc>,
}

#[derive(Debug, Deserialize)]
struct RawRpc {
    registry: Option<RawRegistry>,
    server: Option<RawServer>,
    client: Option<RawClient>,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    ip: Option<String>,
    port: Option<u16>,
    /// Legacy switch for an alternative serializer; the codec is fixed.
    #[serde(rename = "use.simple.json")]
    use_simple_json: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawClient {
    timeout: Option<u64>,
    #[serde(rename = "use.simple.json")]
    use_simple_json: Option<bool>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load config from a TOML file.
pub fn load_config_from_path(path: &Path) -> Result<RpcConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<RpcConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let rpc = raw
        .rpc
        .ok_or_else(|| ConfigError::MissingField("rpc".to_owned()))?;

    let registry_address = rpc
        .registry
        .and_then(|r| r.address)
        .ok_or_else(|| ConfigError::MissingField("rpc.registry.address".to_owned()))?;
    if registry_address.is_empty() {
        return Err(ConfigError::InvalidValue(
            "rpc.registry.address must not be empty".to_owned(),
        ));
    }

    let (server_ip, server_port) = match rpc.server {
        Some(s) => {
            if s.use_simple_json.is_some() {
                tracing::debug!("rpc.server.use.simple.json is ignored; the codec is fixed");
            }
            (s.ip, s.port.unwrap_or(9000))
        }
        None => (None, 9000),
    };

    let client_timeout_ms = match rpc.client {
        Some(c) => {
            if c.use_simple_json.is_some() {
                tracing::debug!("rpc.client.use.simple.json is ignored; the codec is fixed");
            }
            c.timeout.unwrap_or(5000)
        }
        None => 5000,
    };

    Ok(RpcConfig {
        registry_address,
        server_ip,
        server_port,
        client_timeout_ms,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
