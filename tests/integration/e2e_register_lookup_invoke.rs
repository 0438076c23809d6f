//! End-to-end: registry + providers + consumer.
//!
//! Covers the full happy path (register → lookup → connect → invoke →
//! respond), registration idempotence, and the uniform-random spread over
//! multiple providers of the same service.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use registry::{RegistryConfig, RegistryServer};
use serde_json::{json, Value};
use switchboard::{
    handler_fn, ConsumerClient, ProviderBuilder, ProxyBuilder, RegistryClient,
    RegistryClientConfig, ServiceInfo,
};

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

async fn start_registry() -> RegistryServer {
    RegistryServer::bind("127.0.0.1:0", RegistryConfig::default())
        .await
        .unwrap()
}

async fn consumer_for(registry: &RegistryServer) -> Arc<ConsumerClient> {
    let client =
        RegistryClient::connect(RegistryClientConfig::new(registry.local_addr().to_string()))
            .await
            .unwrap();
    Arc::new(ConsumerClient::new(client))
}

/// A provider whose `whoami` method answers with `tag`.
async fn start_tagged_provider(registry: &RegistryServer, tag: &str) -> switchboard::ProviderServer {
    let tag = tag.to_owned();
    ProviderBuilder::new(registry.local_addr().to_string())
        .ip("127.0.0.1")
        .port(0)
        .service(
            "Echo",
            handler_fn(move |method, params| match method {
                "echo" => Ok(params.first().cloned().unwrap_or(Value::Null)),
                "whoami" => Ok(json!(tag.clone())),
                other => Err(format!("no such method: {other}")),
            }),
        )
        .serve()
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_invoke_path() {
    let registry = start_registry().await;
    let provider = start_tagged_provider(&registry, "p1").await;
    let consumer = consumer_for(&registry).await;

    let proxy = ProxyBuilder::new(consumer.clone(), "Echo").build();
    let value: String = proxy.call("echo", vec![json!("roundtrip")]).await;
    assert_eq!(value, "roundtrip");

    provider.shutdown().await;
    consumer.shutdown().await;
}

#[tokio::test]
async fn registering_twice_keeps_one_entry_per_address() {
    let registry = start_registry().await;
    let client =
        RegistryClient::connect(RegistryClientConfig::new(registry.local_addr().to_string()))
            .await
            .unwrap();

    let info = ServiceInfo::new("Echo", "1.0.0", "", "10.0.0.1:9000");
    client.register(info.clone()).await.unwrap();
    client.register(info).await.unwrap();

    let found = client.lookup("Echo", "1.0.0", "").await.unwrap();
    assert_eq!(found.len(), 1);
    client.destroy().await;
}

#[tokio::test]
async fn lookup_key_matches_between_consumer_and_registry() {
    let registry = start_registry().await;
    let client =
        RegistryClient::connect(RegistryClientConfig::new(registry.local_addr().to_string()))
            .await
            .unwrap();

    // Registered with explicit empty version/group; looked up the same way.
    client
        .register(ServiceInfo::new("Plain", "", "", "10.0.0.1:9000"))
        .await
        .unwrap();
    let found = client.lookup("Plain", "", "").await.unwrap();
    assert_eq!(found.len(), 1);

    // A different version is a different key.
    assert!(client.lookup("Plain", "2.0.0", "").await.unwrap().is_empty());
    client.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_balance_reaches_every_provider() {
    let registry = start_registry().await;
    let p1 = start_tagged_provider(&registry, "p1").await;
    let p2 = start_tagged_provider(&registry, "p2").await;
    let consumer = consumer_for(&registry).await;
    let proxy = ProxyBuilder::new(consumer.clone(), "Echo").build();

    let mut seen = HashSet::new();
    for _ in 0..40 {
        let tag: String = proxy.call("whoami", vec![]).await;
        assert!(tag == "p1" || tag == "p2", "unexpected tag: {tag}");
        seen.insert(tag);
        if seen.len() == 2 {
            break;
        }
    }
    assert_eq!(seen.len(), 2, "uniform choice should reach both providers");

    p1.shutdown().await;
    p2.shutdown().await;
    consumer.shutdown().await;
}

#[tokio::test]
async fn provider_shutdown_removes_it_from_lookup() {
    let registry = start_registry().await;
    let provider = start_tagged_provider(&registry, "p1").await;
    assert_eq!(registry.state().lookup("Echo", "1.0.0", "").len(), 1);

    provider.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(registry.state().lookup("Echo", "1.0.0", "").is_empty());
}
