//! JSON-RPC 2.0 messaging over a [`Channel`](crate::channel::Channel)
//!
//! [`JsonRpc`] correlates outgoing calls with their responses, broadcasts
//! incoming notifications and hands incoming calls to an [`RpcHandler`].

mod engine;
pub mod protocol;

pub use engine::{JsonRpc, PendingResponse, HANDLER_TIMEOUT};
pub use protocol::{ErrorObject, RpcErrorCode, RpcResponse};

use async_trait::async_trait;
use serde_json::Value;

/// Answers incoming calls
///
/// Invoked on a spawned task, never on the thread that received the frame.
/// Implementations that touch shared state must synchronise it themselves.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Produce the response for one call
    async fn handle(&self, method: &str, params: Value) -> RpcResponse;
}

/// Handler for peers that expose no methods
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyHandler;

#[async_trait]
impl RpcHandler for EmptyHandler {
    async fn handle(&self, _method: &str, _params: Value) -> RpcResponse {
        RpcResponse::error(
            RpcErrorCode::MethodNotFound,
            "This handler implements no callable methods",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_handler_rejects_everything() {
        let response = EmptyHandler.handle("join", json!({})).await;
        assert_eq!(response.error_code(), Some(RpcErrorCode::MethodNotFound));
    }
}
