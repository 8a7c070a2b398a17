use super::protocol::{
    id_key, ErrorObject, Incoming, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcErrorCode,
    RpcResponse,
};
use super::RpcHandler;
use crate::channel::Channel;
use crate::delegate::{Delegate, DelegateHandle};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// How long an incoming call's handler may take before the call is dropped
pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Id counter and in-flight calls, guarded by one lock
#[derive(Default)]
struct PendingCalls {
    next_id: u64,
    calls: HashMap<String, oneshot::Sender<RpcResponse>>,
    closed: bool,
}

struct EngineInner {
    channel: Arc<dyn Channel>,
    handler: Arc<dyn RpcHandler>,
    pending: Mutex<PendingCalls>,
    on_notify: Delegate<(String, Value)>,
    handler_timeout: Duration,
}

/// JSON-RPC endpoint bound to one channel and one handler
///
/// The engine does not own the channel: [`close`](Self::close) unwinds
/// in-flight calls but leaves closing the transport to the caller.
pub struct JsonRpc {
    inner: Arc<EngineInner>,
    subscription: DelegateHandle,
}

/// Future of one outgoing call
///
/// Resolves exactly once, with the peer's response or with a `Closed`
/// error when the engine is closed or dropped first.
#[derive(Debug)]
pub struct PendingResponse {
    id: String,
    rx: oneshot::Receiver<RpcResponse>,
}

impl PendingResponse {
    /// Correlation id sent with the call
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Await the response for at most `timeout`
    pub async fn wait(self, timeout: Duration) -> Result<RpcResponse> {
        let id = self.id.clone();
        tokio::time::timeout(timeout, self).await.map_err(|_| {
            Error::OperationTimeout(format!("No response to call id={} within {:?}", id, timeout))
        })
    }
}

impl Future for PendingResponse {
    type Output = RpcResponse;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|response| response.unwrap_or_else(|_| RpcResponse::closed()))
    }
}

impl JsonRpc {
    /// Bind to `channel` and start handling its inbound frames
    pub fn new(channel: Arc<dyn Channel>, handler: Arc<dyn RpcHandler>) -> Self {
        Self::with_handler_timeout(channel, handler, HANDLER_TIMEOUT)
    }

    /// Like [`new`](Self::new) with a custom incoming-call timeout
    pub fn with_handler_timeout(
        channel: Arc<dyn Channel>,
        handler: Arc<dyn RpcHandler>,
        handler_timeout: Duration,
    ) -> Self {
        let inner = Arc::new(EngineInner {
            channel: Arc::clone(&channel),
            handler,
            pending: Mutex::new(PendingCalls::default()),
            on_notify: Delegate::new(),
            handler_timeout,
        });

        let weak: Weak<EngineInner> = Arc::downgrade(&inner);
        let subscription = channel.on_message().add(move |text: &String| {
            if let Some(inner) = weak.upgrade() {
                inner.process_incoming(text);
            }
        });

        Self { inner, subscription }
    }

    /// Send a call and return the future of its response
    pub fn call(&self, method: &str, params: Value) -> PendingResponse {
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut pending = self.inner.pending.lock();
            pending.next_id += 1;
            let id = pending.next_id.to_string();
            if pending.closed {
                let _ = tx.send(RpcResponse::closed());
                return PendingResponse { id, rx };
            }
            pending.calls.insert(id.clone(), tx);
            id
        };

        debug!("Calling {} (id={})", method, id);
        let sent = JsonRpcRequest::new(method, params, Some(Value::String(id.clone())))
            .to_json()
            .and_then(|json| self.inner.channel.send(&json));

        if let Err(e) = sent {
            error!("Failed to send call {} (id={}): {}", method, id, e);
            let tx = self.inner.pending.lock().calls.remove(&id);
            if let Some(tx) = tx {
                let _ = tx.send(RpcResponse::error(RpcErrorCode::InternalError, e.to_string()));
            }
        }

        PendingResponse { id, rx }
    }

    /// Send a notification; nothing is awaited
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        debug!("Notifying {}", method);
        let json = JsonRpcRequest::new(method, params, None).to_json()?;
        self.inner.channel.send(&json)
    }

    /// Fires with `(method, params)` for every incoming notification
    pub fn on_notify(&self) -> &Delegate<(String, Value)> {
        &self.inner.on_notify
    }

    /// Resolve every in-flight call with a `Closed` error
    ///
    /// Calls made afterwards resolve immediately the same way.
    pub fn close(&self) {
        let drained: Vec<(String, oneshot::Sender<RpcResponse>)> = {
            let mut pending = self.inner.pending.lock();
            pending.closed = true;
            pending.calls.drain().collect()
        };

        for (id, tx) in drained {
            debug!("Unwinding call id={} on close", id);
            let _ = tx.send(RpcResponse::closed());
        }
    }

    /// Number of calls awaiting a response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().calls.len()
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.inner.channel
    }
}

impl Drop for JsonRpc {
    fn drop(&mut self) {
        self.inner.channel.on_message().remove(self.subscription);
    }
}

impl EngineInner {
    fn process_incoming(self: &Arc<Self>, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse incoming message: {}", e);
                self.send_error(RpcErrorCode::ParseError, format!("Parse error: {}", e), Value::Null);
                return;
            }
        };

        match message {
            Value::Array(batch) => {
                for element in batch {
                    match element {
                        Value::Object(envelope) => self.process_envelope(envelope),
                        _ => self.send_error(
                            RpcErrorCode::InvalidRequest,
                            "Batch element is not an object",
                            Value::Null,
                        ),
                    }
                }
            }
            Value::Object(envelope) => self.process_envelope(envelope),
            _ => self.send_error(
                RpcErrorCode::InvalidRequest,
                "Message is neither an object nor an array",
                Value::Null,
            ),
        }
    }

    fn process_envelope(self: &Arc<Self>, envelope: Map<String, Value>) {
        match Incoming::classify(envelope) {
            Incoming::Error { id, error } => {
                error!("Received error response (id={:?}): {}", id, error);
                let tx = id.as_ref().and_then(id_key).and_then(|key| self.take_pending(&key));
                if let Some(tx) = tx {
                    let error = serde_json::from_value::<ErrorObject>(error.clone())
                        .unwrap_or_else(|_| ErrorObject {
                            code: RpcErrorCode::InternalError.code(),
                            message: error.to_string(),
                            data: None,
                        });
                    let _ = tx.send(RpcResponse::Failure(error));
                }
            }
            Incoming::Result { id: None, .. } => {
                warn!("Received a result without an id");
                self.send_error(
                    RpcErrorCode::InvalidRequest,
                    "No id field in the response",
                    Value::Null,
                );
            }
            Incoming::Result { id: Some(id), result } => {
                match id_key(&id).and_then(|key| self.take_pending(&key)) {
                    Some(tx) => {
                        let _ = tx.send(RpcResponse::Success(result));
                    }
                    None => {
                        warn!("Unmatched response id={}", id);
                        self.send_error(
                            RpcErrorCode::InvalidRequest,
                            format!("Unmatched response id={}", id),
                            id,
                        );
                    }
                }
            }
            Incoming::Call { method, params: None, id } => {
                warn!("Call {} (id={}) has no params", method, id);
                self.send_error(RpcErrorCode::InvalidRequest, "No params field in the call", id);
            }
            Incoming::Call { method, params: Some(params), id } => {
                self.dispatch_call(method, params, id);
            }
            Incoming::Notify { method, params: None } => {
                warn!("Notify {} has no params", method);
                self.send_error(
                    RpcErrorCode::InvalidRequest,
                    "No params field in the notify",
                    Value::Null,
                );
            }
            Incoming::Notify { method, params: Some(params) } => {
                debug!("Received notify {}", method);
                self.on_notify.broadcast(&(method, params));
            }
            Incoming::Malformed => {
                error!("Malformed message: no error, result or method field");
            }
        }
    }

    fn take_pending(&self, key: &str) -> Option<oneshot::Sender<RpcResponse>> {
        self.pending.lock().calls.remove(key)
    }

    fn dispatch_call(self: &Arc<Self>, method: String, params: Value, id: Value) {
        let handler = Arc::clone(&self.handler);
        let engine = Arc::downgrade(self);
        let timeout = self.handler_timeout;

        tokio::spawn(async move {
            let response = match tokio::time::timeout(timeout, handler.handle(&method, params)).await
            {
                Ok(response) => response,
                Err(_) => {
                    error!(
                        "Handler for {} (id={}) did not respond within {:?}, dropping call",
                        method, id, timeout
                    );
                    return;
                }
            };

            if let Some(engine) = engine.upgrade() {
                engine.send_response(response, id);
            }
        });
    }

    fn send_response(&self, response: RpcResponse, id: Value) {
        let json = match response {
            RpcResponse::Success(result) => JsonRpcResponse::new(result, id).to_json(),
            RpcResponse::Failure(error) => JsonRpcError::new(error, id).to_json(),
        };

        if let Err(e) = json.and_then(|json| self.channel.send(&json)) {
            error!("Failed to send response: {}", e);
        }
    }

    fn send_error(&self, code: RpcErrorCode, message: impl Into<String>, id: Value) {
        self.send_response(RpcResponse::error(code, message), id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PairedChannel;
    use crate::rpc::EmptyHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Records frames sent by the engine and lets tests inject inbound ones
    #[derive(Default)]
    struct ScriptedChannel {
        sent: Mutex<Vec<Value>>,
        on_message: Delegate<String>,
    }

    impl Channel for ScriptedChannel {
        fn send(&self, message: &str) -> Result<()> {
            self.sent.lock().push(serde_json::from_str(message)?);
            Ok(())
        }

        fn close(&self, _code: u16, _reason: &str) {}

        fn on_message(&self) -> &Delegate<String> {
            &self.on_message
        }
    }

    impl ScriptedChannel {
        fn inject(&self, frame: &str) {
            self.on_message.broadcast(&frame.to_string());
        }

        fn last_sent(&self) -> Value {
            self.sent.lock().last().cloned().unwrap_or(Value::Null)
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl RpcHandler for SlowHandler {
        async fn handle(&self, _method: &str, _params: Value) -> RpcResponse {
            tokio::time::sleep(Duration::from_secs(60)).await;
            RpcResponse::ok(true)
        }
    }

    fn engine(channel: &Arc<ScriptedChannel>) -> JsonRpc {
        JsonRpc::new(channel.clone(), Arc::new(EmptyHandler))
    }

    #[tokio::test]
    async fn test_ids_are_sequential_strings() {
        let channel = Arc::new(ScriptedChannel::default());
        let rpc = engine(&channel);

        let first = rpc.call("a", json!([]));
        let second = rpc.call("b", json!([]));

        assert_eq!(first.id(), "1");
        assert_eq!(second.id(), "2");
        assert_eq!(
            channel.sent.lock()[1],
            json!({"jsonrpc": "2.0", "method": "b", "params": [], "id": "2"})
        );
        assert_eq!(rpc.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_result_resolves_matching_call() {
        let channel = Arc::new(ScriptedChannel::default());
        let rpc = engine(&channel);

        let pending = rpc.call("join", json!({"sid": "room"}));
        channel.inject(r#"{"jsonrpc":"2.0","id":"1","result":{"sdp":"answer"}}"#);

        let response = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response, RpcResponse::ok(json!({"sdp": "answer"})));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_numeric_response_id_matches() {
        let channel = Arc::new(ScriptedChannel::default());
        let rpc = engine(&channel);

        let pending = rpc.call("ping", json!([]));
        channel.inject(r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#);

        assert_eq!(pending.await, RpcResponse::ok("pong"));
    }

    #[tokio::test]
    async fn test_unmatched_response_is_reported() {
        let channel = Arc::new(ScriptedChannel::default());
        let _rpc = engine(&channel);

        channel.inject(r#"{"jsonrpc":"2.0","id":42,"result":true}"#);

        assert_eq!(
            channel.last_sent(),
            json!({
                "jsonrpc": "2.0",
                "id": 42,
                "error": {"code": -32600, "message": "Unmatched response id=42"}
            })
        );
    }

    #[tokio::test]
    async fn test_result_without_id_is_reported() {
        let channel = Arc::new(ScriptedChannel::default());
        let _rpc = engine(&channel);

        channel.inject(r#"{"jsonrpc":"2.0","result":true}"#);

        let sent = channel.last_sent();
        assert_eq!(sent["id"], Value::Null);
        assert_eq!(sent["error"]["message"], "No id field in the response");
    }

    #[tokio::test]
    async fn test_parse_error_gets_null_id() {
        let channel = Arc::new(ScriptedChannel::default());
        let _rpc = engine(&channel);

        channel.inject("{not json");

        let sent = channel.last_sent();
        assert_eq!(sent["id"], Value::Null);
        assert_eq!(sent["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_scalar_payload_is_invalid_request() {
        let channel = Arc::new(ScriptedChannel::default());
        let _rpc = engine(&channel);

        channel.inject("17");

        assert_eq!(channel.last_sent()["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_malformed_envelope_gets_no_reply() {
        let channel = Arc::new(ScriptedChannel::default());
        let _rpc = engine(&channel);

        channel.inject(r#"{"jsonrpc":"2.0","id":"9"}"#);

        assert!(channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_error_response_resolves_matching_call_and_is_not_answered() {
        let channel = Arc::new(ScriptedChannel::default());
        let rpc = engine(&channel);

        let pending = rpc.call("join", json!({}));
        channel.inject(r#"{"jsonrpc":"2.0","id":"1","error":{"code":20,"message":"room full"}}"#);

        let response = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.error_code(), Some(RpcErrorCode::HandlerError));
        assert_eq!(response.error_object().unwrap().message, "room full");
        // only the original call went out
        assert_eq!(channel.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_elements_processed_independently() {
        let channel = Arc::new(ScriptedChannel::default());
        let rpc = engine(&channel);
        let (tx, mut rx) = mpsc::unbounded_channel();
        rpc.on_notify().add(move |(method, params)| {
            let _ = tx.send((method.clone(), params.clone()));
        });

        let pending = rpc.call("a", json!([]));
        channel.inject(
            r#"[{"jsonrpc":"2.0","id":"1","result":1},{"jsonrpc":"2.0","method":"tick","params":[2]},3]"#,
        );

        assert_eq!(pending.await, RpcResponse::ok(1));
        assert_eq!(rx.recv().await, Some(("tick".to_string(), json!([2]))));
        assert_eq!(channel.last_sent()["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_notify_without_params_is_rejected() {
        let channel = Arc::new(ScriptedChannel::default());
        let rpc = engine(&channel);
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        rpc.on_notify().add(move |_| *counter.lock() += 1);

        channel.inject(r#"{"jsonrpc":"2.0","method":"offer"}"#);

        assert_eq!(*fired.lock(), 0);
        assert_eq!(channel.last_sent()["error"]["message"], "No params field in the notify");
    }

    #[tokio::test]
    async fn test_incoming_call_without_params_echoes_id() {
        let channel = Arc::new(ScriptedChannel::default());
        let _rpc = engine(&channel);

        channel.inject(r#"{"jsonrpc":"2.0","method":"Joined","id":5}"#);

        let sent = channel.last_sent();
        assert_eq!(sent["id"], 5);
        assert_eq!(sent["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_handler_error_is_sent_with_original_id() {
        let channel = Arc::new(ScriptedChannel::default());
        let _rpc = engine(&channel);

        channel.inject(r#"{"jsonrpc":"2.0","method":"anything","params":[],"id":"abc"}"#);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            channel.last_sent(),
            json!({
                "jsonrpc": "2.0",
                "id": "abc",
                "error": {"code": -32601, "message": "This handler implements no callable methods"}
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_drops_call() {
        let channel = Arc::new(ScriptedChannel::default());
        let _rpc = JsonRpc::new(channel.clone(), Arc::new(SlowHandler));

        channel.inject(r#"{"jsonrpc":"2.0","method":"slow","params":[],"id":1}"#);
        tokio::time::sleep(Duration::from_secs(90)).await;

        assert!(channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_close_unwinds_pending_calls() {
        let (local, _remote) = PairedChannel::pair();
        let rpc = JsonRpc::new(local, Arc::new(EmptyHandler));

        let first = rpc.call("a", json!([]));
        let second = rpc.call("b", json!([]));
        rpc.close();

        for pending in [first, second] {
            let response = pending.wait(Duration::from_secs(1)).await.unwrap();
            assert_eq!(response.error_code(), Some(RpcErrorCode::Closed));
        }
        assert_eq!(rpc.pending_count(), 0);

        let late = rpc.call("c", json!([])).wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(late.error_code(), Some(RpcErrorCode::Closed));
    }

    #[tokio::test]
    async fn test_dropping_engine_resolves_calls_and_unsubscribes() {
        let channel = Arc::new(ScriptedChannel::default());
        let rpc = engine(&channel);
        let pending = rpc.call("a", json!([]));

        drop(rpc);

        assert!(channel.on_message.is_empty());
        assert_eq!(pending.await.error_code(), Some(RpcErrorCode::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let channel = Arc::new(ScriptedChannel::default());
        let rpc = engine(&channel);

        let result = rpc.call("never", json!([])).wait(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(Error::OperationTimeout(_))));
    }
}
