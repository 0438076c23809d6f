//! Heartbeat keep-alive and expiry sweep.
//!
//! The production windows (10 s sweep, 120 s TTL) are shrunk to
//! milliseconds through the registry config; the behavior under test is
//! identical: heartbeats keep an entry visible, silence removes it from
//! both tables on the next sweep.

use std::time::Duration;

use registry::{RegistryConfig, RegistryServer};
use sb_test_utils::wait_until;
use switchboard::{RegistryClient, RegistryClientConfig, ServiceInfo};

fn fast_registry_config() -> RegistryConfig {
    RegistryConfig {
        sweep_interval: Duration::from_millis(100),
        heartbeat_ttl: Duration::from_millis(400),
        reader_idle: Duration::from_secs(10),
    }
}

fn heartbeating_client_config(addr: String) -> RegistryClientConfig {
    RegistryClientConfig {
        heartbeat_interval: Duration::from_millis(100),
        ..RegistryClientConfig::with_heartbeat(addr)
    }
}

#[tokio::test]
async fn heartbeats_keep_the_provider_visible() {
    let registry = RegistryServer::bind("127.0.0.1:0", fast_registry_config())
        .await
        .unwrap();
    let client =
        RegistryClient::connect(heartbeating_client_config(registry.local_addr().to_string()))
            .await
            .unwrap();
    client
        .register(ServiceInfo::new("Echo", "1.0.0", "", "10.0.0.1:9000"))
        .await
        .unwrap();

    // Several TTL windows and sweeps pass; the heartbeat loop keeps the
    // entry alive the whole time.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let found = registry.state().lookup("Echo", "1.0.0", "");
        assert_eq!(found.len(), 1, "entry must stay visible while heartbeating");
        assert_eq!(found[0].address, "10.0.0.1:9000");
    }
    client.destroy().await;
}

#[tokio::test]
async fn silent_provider_is_swept_from_both_tables() {
    let registry = RegistryServer::bind("127.0.0.1:0", fast_registry_config())
        .await
        .unwrap();
    // No heartbeat on this client: after registration it stays silent.
    let client =
        RegistryClient::connect(RegistryClientConfig::new(registry.local_addr().to_string()))
            .await
            .unwrap();
    client
        .register(ServiceInfo::new("Echo", "1.0.0", "", "10.0.0.1:9000"))
        .await
        .unwrap();
    assert_eq!(registry.state().lookup("Echo", "1.0.0", "").len(), 1);

    let swept = wait_until(Duration::from_secs(2), || {
        registry.state().lookup("Echo", "1.0.0", "").is_empty()
    })
    .await;
    assert!(swept, "silent provider must be expired by the sweeper");
    assert_eq!(registry.state().heartbeat_count(), 0);
    assert_eq!(registry.state().service_key_count(), 0);
}

#[tokio::test]
async fn expiry_only_removes_the_silent_address() {
    let registry = RegistryServer::bind("127.0.0.1:0", fast_registry_config())
        .await
        .unwrap();

    let silent =
        RegistryClient::connect(RegistryClientConfig::new(registry.local_addr().to_string()))
            .await
            .unwrap();
    silent
        .register(ServiceInfo::new("Echo", "1.0.0", "", "10.0.0.1:9000"))
        .await
        .unwrap();

    let lively =
        RegistryClient::connect(heartbeating_client_config(registry.local_addr().to_string()))
            .await
            .unwrap();
    lively
        .register(ServiceInfo::new("Echo", "1.0.0", "", "10.0.0.2:9000"))
        .await
        .unwrap();

    let swept = wait_until(Duration::from_secs(2), || {
        let found = registry.state().lookup("Echo", "1.0.0", "");
        found.len() == 1 && found[0].address == "10.0.0.2:9000"
    })
    .await;
    assert!(swept, "only the silent address should be swept");
    lively.destroy().await;
}
