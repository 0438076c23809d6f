//! Friendly-value policy and timeout honouring on the consumer façade.

use std::sync::Arc;
use std::time::Duration;

use registry::{RegistryConfig, RegistryServer};
use sb_test_utils::{failing_handler, slow_handler};
use serde_json::{json, Value};
use switchboard::{
    ConsumerClient, ProviderBuilder, ProxyBuilder, RegistryClient, RegistryClientConfig, RpcError,
};

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

// ---------------------------------------------------------------------------
// Service-not-found
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_service_produces_the_literal_friendly_string() {
    let registry = start_registry().await;
    let proxy = ProxyBuilder::new(consumer_for(&registry).await, "com.ex.UserService").build();

    let value: String = proxy.call("getUser", vec![json!(123)]).await;
    assert_eq!(value, "error: service not found: com.ex.UserService_1.0.0_");
}

#[tokio::test]
async fn missing_service_friendly_values_match_each_return_type() {
    let registry = start_registry().await;
    let consumer = consumer_for(&registry).await;
    let proxy = ProxyBuilder::new(consumer, "Missing").build();

    let n: i64 = proxy.call("m", vec![]).await;
    assert_eq!(n, 0);
    let b: bool = proxy.call("m", vec![]).await;
    assert!(!b);
    let v: Vec<String> = proxy.call("m", vec![]).await;
    assert!(v.is_empty());
    let o: Option<String> = proxy.call("m", vec![]).await;
    assert_eq!(o, None);
    let raw: Value = proxy.call("m", vec![]).await;
    assert_eq!(raw, Value::Null);
}

// ---------------------------------------------------------------------------
// Remote failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remote_failure_surfaces_the_remote_message() {
    let registry = start_registry().await;
    let provider = ProviderBuilder::new(registry.local_addr().to_string())
        .ip("127.0.0.1")
        .port(0)
        .service("Flaky", failing_handler("database unavailable"))
        .serve()
        .await
        .unwrap();

    let proxy = ProxyBuilder::new(consumer_for(&registry).await, "Flaky").build();
    let value: String = proxy.call("load", vec![]).await;
    assert_eq!(value, "error: remote: database unavailable");
    provider.shutdown().await;
}

// ---------------------------------------------------------------------------
// Timeout honouring
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn awaiter_resolves_no_later_than_the_timeout() {
    let registry = start_registry().await;
    let provider = ProviderBuilder::new(registry.local_addr().to_string())
        .ip("127.0.0.1")
        .port(0)
        .service("Sleepy", slow_handler(Duration::from_secs(3), json!("late")))
        .serve()
        .await
        .unwrap();

    let proxy = ProxyBuilder::new(consumer_for(&registry).await, "Sleepy")
        .timeout(Duration::from_millis(250))
        .build();

    let start = tokio::time::Instant::now();
    let value: String = proxy.call("nap", vec![]).await;
    let elapsed = start.elapsed();

    assert_eq!(value, "error: timed out waiting for response");
    assert!(
        elapsed < Duration::from_secs(1),
        "timed out after {elapsed:?}, expected ~250ms"
    );
    provider.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_surface_times_out_with_a_typed_error() {
    let registry = start_registry().await;
    let provider = ProviderBuilder::new(registry.local_addr().to_string())
        .ip("127.0.0.1")
        .port(0)
        .service("Sleepy", slow_handler(Duration::from_secs(3), json!("late")))
        .serve()
        .await
        .unwrap();

    let proxy = ProxyBuilder::new(consumer_for(&registry).await, "Sleepy").build();
    let handle = proxy.invoke("nap", vec![]).await.unwrap();
    let err = handle.wait(Duration::from_millis(200)).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout));
    provider.shutdown().await;
}
