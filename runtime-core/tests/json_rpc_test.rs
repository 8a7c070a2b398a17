//! JSON-RPC engine over a paired channel
//!
//! Two engines talk through an in-process channel pair, one side serving an
//! echo handler.

use async_trait::async_trait;
use passage_core::channel::PairedChannel;
use passage_core::rpc::{EmptyHandler, JsonRpc, RpcErrorCode, RpcHandler, RpcResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

/// Returns the first param, or an error for `fail`
struct EchoHandler;

#[async_trait]
impl RpcHandler for EchoHandler {
    async fn handle(&self, method: &str, params: Value) -> RpcResponse {
        match method {
            "echo" => RpcResponse::ok(params.get(0).cloned().unwrap_or(Value::Null)),
            "fail" => RpcResponse::error(RpcErrorCode::HandlerError, "requested failure"),
            _ => RpcResponse::error(RpcErrorCode::MethodNotFound, format!("No method named '{}'", method)),
        }
    }
}

fn connected_pair() -> (JsonRpc, JsonRpc) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let (local, remote) = PairedChannel::pair();
    let client = JsonRpc::new(local, Arc::new(EmptyHandler));
    let server = JsonRpc::new(remote, Arc::new(EchoHandler));
    (client, server)
}

async fn echo(client: &JsonRpc, value: Value) -> RpcResponse {
    client
        .call("echo", json!([value]))
        .wait(WAIT)
        .await
        .expect("echo call timed out")
}

#[tokio::test]
async fn should_return_boolean() {
    let (client, _server) = connected_pair();
    assert_eq!(echo(&client, json!(true)).await, RpcResponse::ok(true));
    assert_eq!(echo(&client, json!(false)).await, RpcResponse::ok(false));
}

#[tokio::test]
async fn should_return_number() {
    let (client, _server) = connected_pair();
    let response = echo(&client, json!(42.5)).await;
    assert_eq!(response.result(), Some(&json!(42.5)));
    assert!(response.result().unwrap().is_number());
}

#[tokio::test]
async fn should_return_array() {
    let (client, _server) = connected_pair();
    let array = json!([1, "two", [3], {"four": 4}, null]);
    assert_eq!(echo(&client, array.clone()).await, RpcResponse::ok(array));
}

#[tokio::test]
async fn should_return_object() {
    let (client, _server) = connected_pair();
    let object = json!({"sdp": "v=0", "nested": {"list": [true, 1.5]}});
    assert_eq!(echo(&client, object.clone()).await, RpcResponse::ok(object));
}

#[tokio::test]
async fn should_surface_handler_errors() {
    let (client, _server) = connected_pair();
    let response = client.call("fail", json!([])).wait(WAIT).await.unwrap();
    assert_eq!(response.error_code(), Some(RpcErrorCode::HandlerError));
    assert_eq!(response.error_object().unwrap().message, "requested failure");

    let missing = client.call("nope", json!([])).wait(WAIT).await.unwrap();
    assert_eq!(missing.error_code(), Some(RpcErrorCode::MethodNotFound));
}

#[tokio::test]
async fn should_correlate_concurrent_calls() {
    let (client, _server) = connected_pair();
    let calls: Vec<_> = (0..20).map(|i| client.call("echo", json!([i]))).collect();

    let responses = timeout(WAIT, futures::future::join_all(calls)).await.unwrap();
    for (i, response) in responses.into_iter().enumerate() {
        assert_eq!(response, RpcResponse::ok(i));
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn should_notify_delegate_exactly_once() {
    let (client, server) = connected_pair();
    let (tx, mut rx) = mpsc::unbounded_channel();
    server.on_notify().add(move |(method, params)| {
        let _ = tx.send((method.clone(), params.clone()));
    });

    client
        .notify("trickle", json!({"target": 1, "candidate": {"candidate": "c"}}))
        .unwrap();

    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        received,
        ("trickle".to_string(), json!({"target": 1, "candidate": {"candidate": "c"}}))
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn should_close_without_crashing() {
    let (local, _remote) = PairedChannel::pair();
    let client = JsonRpc::new(local, Arc::new(EmptyHandler));

    let pending = client.call("never-answered", json!([]));
    client.close();

    let response = timeout(WAIT, pending).await.expect("close must not hang");
    assert!(response.is_error());
    assert_eq!(response.error_code(), Some(RpcErrorCode::Closed));
}
