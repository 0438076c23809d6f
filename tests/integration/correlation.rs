//! Request/response correlation under interleaving.
//!
//! A stub provider holds two concurrent requests and answers them in
//! reverse order; each caller must still receive its own body, matched
//! strictly by request id.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use registry::{RegistryConfig, RegistryServer};
use serde_json::json;
use switchboard::{
    ConsumerClient, Message, MessageCodec, Payload, RegistryClient, RegistryClientConfig,
    RpcRequest, RpcResponse, ServiceInfo, Status,
};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

/// Accepts one connection, buffers two requests, replies in reverse order,
/// echoing each request's first parameter back in the response data.
async fn spawn_reordering_provider() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, MessageCodec::default());
        let mut held: Vec<(u64, serde_json::Value)> = Vec::new();
        while let Some(Ok(msg)) = framed.next().await {
            if let Payload::Request(request) = msg.payload {
                let param = request.parameters.first().cloned().unwrap_or(json!(null));
                held.push((msg.request_id, param));
                if held.len() == 2 {
                    for (id, param) in held.drain(..).rev() {
                        framed
                            .send(Message::response(
                                id,
                                Status::Ok,
                                RpcResponse::success(param),
                            ))
                            .await
                            .unwrap();
                    }
                }
            }
        }
    });
    addr
}

fn echo_request(marker: &str) -> RpcRequest {
    RpcRequest {
        service_name: "Echo".to_owned(),
        method_name: "echo".to_owned(),
        parameters: vec![json!(marker)],
        parameter_types: vec!["string".to_owned()],
        version: "1.0.0".to_owned(),
        group: String::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reordered_responses_reach_their_own_callers() {
    let registry = RegistryServer::bind("127.0.0.1:0", RegistryConfig::default())
        .await
        .unwrap();
    let provider_addr = spawn_reordering_provider().await;
    registry
        .state()
        .register(ServiceInfo::new("Echo", "1.0.0", "", &provider_addr));

    let client =
        RegistryClient::connect(RegistryClientConfig::new(registry.local_addr().to_string()))
            .await
            .unwrap();
    let consumer = Arc::new(ConsumerClient::new(client));

    // Two concurrent calls over the same cached session.
    let first = consumer.send_request(echo_request("first")).await.unwrap();
    let second = consumer.send_request(echo_request("second")).await.unwrap();
    assert_eq!(first.request_id(), 1);
    assert_eq!(second.request_id(), 2);

    let (ra, rb) = tokio::join!(
        first.wait(Duration::from_secs(5)),
        second.wait(Duration::from_secs(5)),
    );
    assert_eq!(ra.unwrap().data, json!("first"));
    assert_eq!(rb.unwrap().data, json!("second"));

    consumer.shutdown().await;
}

#[tokio::test]
async fn responses_for_unknown_ids_complete_nothing() {
    // A provider that answers every request twice: once correctly, once
    // with a fabricated id.  The duplicate must be dropped with a warning
    // and never surface to any caller.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let provider_addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, MessageCodec::default());
        while let Some(Ok(msg)) = framed.next().await {
            if matches!(msg.payload, Payload::Request(_)) {
                framed
                    .send(Message::response(
                        9999,
                        Status::Ok,
                        RpcResponse::success(json!("stray")),
                    ))
                    .await
                    .unwrap();
                framed
                    .send(Message::response(
                        msg.request_id,
                        Status::Ok,
                        RpcResponse::success(json!("real")),
                    ))
                    .await
                    .unwrap();
            }
        }
    });

    let registry = RegistryServer::bind("127.0.0.1:0", RegistryConfig::default())
        .await
        .unwrap();
    registry
        .state()
        .register(ServiceInfo::new("Echo", "1.0.0", "", &provider_addr));
    let client =
        RegistryClient::connect(RegistryClientConfig::new(registry.local_addr().to_string()))
            .await
            .unwrap();
    let consumer = Arc::new(ConsumerClient::new(client));

    let handle = consumer.send_request(echo_request("x")).await.unwrap();
    let response = handle.wait(Duration::from_secs(5)).await.unwrap();
    assert_eq!(response.data, json!("real"));

    consumer.shutdown().await;
}
