//! Reconnect replay.
//!
//! A heartbeat-enabled registry session survives a registry restart: the
//! supervisor detects the dead session, reconnects, and re-registers
//! exactly the cached set of services, in registration order.

use std::time::Duration;

use registry::{RegistryConfig, RegistryServer};
use sb_test_utils::{free_port, wait_until};
use switchboard::{RegistryClient, RegistryClientConfig, ServiceInfo};

fn fast_registry_config() -> RegistryConfig {
    RegistryConfig {
        sweep_interval: Duration::from_millis(200),
        heartbeat_ttl: Duration::from_secs(5),
        reader_idle: Duration::from_secs(10),
    }
}

fn replaying_client_config(addr: String) -> RegistryClientConfig {
    RegistryClientConfig {
        heartbeat_interval: Duration::from_millis(150),
        connect_attempts: 10,
        connect_retry_interval: Duration::from_millis(150),
        connect_deadline: Duration::from_secs(2),
        ..RegistryClientConfig::with_heartbeat(addr)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_restart_replays_all_registrations_in_order() {
    let port = free_port().await;
    let bind_addr = format!("127.0.0.1:{port}");

    let first = RegistryServer::bind(&bind_addr, fast_registry_config())
        .await
        .unwrap();
    let client = RegistryClient::connect(replaying_client_config(bind_addr.clone()))
        .await
        .unwrap();

    let a = ServiceInfo::new("ServiceA", "1.0.0", "", "10.0.0.1:9000");
    let b = ServiceInfo::new("ServiceB", "1.0.0", "", "10.0.0.1:9000");
    client.register(a.clone()).await.unwrap();
    client.register(b.clone()).await.unwrap();
    assert_eq!(client.registered_services(), vec![a.clone(), b.clone()]);

    // Restart: the first instance goes away entirely, a new empty one
    // takes over the same port.
    first.shutdown();
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = RegistryServer::bind(&bind_addr, fast_registry_config())
        .await
        .unwrap();
    assert!(second.state().lookup("ServiceA", "1.0.0", "").is_empty());

    // The heartbeat loop must notice the dead session and replay both
    // registrations within a few heartbeat intervals.
    let replayed = wait_until(Duration::from_secs(6), || {
        second.state().lookup("ServiceA", "1.0.0", "").len() == 1
            && second.state().lookup("ServiceB", "1.0.0", "").len() == 1
    })
    .await;
    assert!(replayed, "both services must be re-registered after restart");

    // The replay cache itself is unchanged, in registration order.
    assert_eq!(client.registered_services(), vec![a, b]);
    client.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unregistered_services_are_not_replayed() {
    let port = free_port().await;
    let bind_addr = format!("127.0.0.1:{port}");

    let first = RegistryServer::bind(&bind_addr, fast_registry_config())
        .await
        .unwrap();
    let client = RegistryClient::connect(replaying_client_config(bind_addr.clone()))
        .await
        .unwrap();

    let a = ServiceInfo::new("ServiceA", "1.0.0", "", "10.0.0.1:9000");
    let b = ServiceInfo::new("ServiceB", "1.0.0", "", "10.0.0.1:9000");
    client.register(a.clone()).await.unwrap();
    client.register(b.clone()).await.unwrap();
    client.unregister(&a).await.unwrap();

    first.shutdown();
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = RegistryServer::bind(&bind_addr, fast_registry_config())
        .await
        .unwrap();

    let replayed = wait_until(Duration::from_secs(6), || {
        second.state().lookup("ServiceB", "1.0.0", "").len() == 1
    })
    .await;
    assert!(replayed);
    // A was unregistered before the restart; it must stay gone.
    assert!(second.state().lookup("ServiceA", "1.0.0", "").is_empty());
    client.destroy().await;
}
