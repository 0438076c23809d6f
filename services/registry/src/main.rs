// registry: standalone service registry binary.
//
// Usage: registry [port] [debug|test|debugtest]
//   port       listen port (default 8000)
//   debug      verbose logging
//   test       pre-register two demo entries at startup
//   debugtest  both

use clap::{Parser, ValueEnum};
use registry::{RegistryConfig, RegistryServer};
use sb_protocol::ServiceInfo;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Debug,
    Test,
    Debugtest,
}

#[derive(Debug, Parser)]
#[command(name = "registry", version, about = "Switchboard service registry")]
struct Cli {
    /// Listen port.
    #[arg(default_value_t = 8000)]
    port: u16,
    /// Startup mode.
    #[arg(value_enum)]
    mode: Option<Mode>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let (debug, test) = match cli.mode {
        Some(Mode::Debug) => (true, false),
        Some(Mode::Test) => (false, true),
        Some(Mode::Debugtest) => (true, true),
        None => (false, false),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if debug { "debug" } else { "info" })
            }),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cli.port,
        "registry starting"
    );

    let server = match RegistryServer::bind(
        &format!("0.0.0.0:{}", cli.port),
        RegistryConfig::default(),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            eprintln!("FATAL: failed to bind port {}: {}", cli.port, e);
            std::process::exit(1);
        }
    };

    if test {
        for info in demo_entries() {
            let key = server.state().register(info);
            info!(%key, "demo service registered");
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("FATAL: failed to listen for shutdown signal: {e}");
        std::process::exit(1);
    }
    server.shutdown();
    info!("registry stopped");
}

/// Demo entries for `test` mode, so consumers have something to look up
/// against a freshly started registry.
fn demo_entries() -> Vec<ServiceInfo> {
    vec![
        ServiceInfo::new("demo.EchoService", "1.0.0", "", "127.0.0.1:9001"),
        ServiceInfo::new("demo.TimeService", "1.0.0", "", "127.0.0.1:9002"),
    ]
}
