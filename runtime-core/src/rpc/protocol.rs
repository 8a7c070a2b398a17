//! JSON-RPC 2.0 envelope types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request or notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters
    pub params: Value,

    /// Request ID for matching with response (absent for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Request ID this response corresponds to
    pub id: Value,

    /// Result data
    pub result: Value,
}

/// JSON-RPC 2.0 error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Request ID this error corresponds to, or null
    pub id: Value,

    /// Error details
    pub error: ErrorObject,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Error codes: the JSON-RPC 2.0 set plus two local extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCode {
    /// Invalid JSON was received
    ParseError,
    /// The JSON sent is not a valid envelope
    InvalidRequest,
    /// The method does not exist / is not available
    MethodNotFound,
    /// Invalid method parameter(s)
    InvalidParams,
    /// Internal JSON-RPC error
    InternalError,
    /// Engine closed before a response arrived
    Closed,
    /// Application failure reported by a handler
    HandlerError,
}

impl RpcErrorCode {
    /// Wire value
    pub fn code(self) -> i32 {
        match self {
            RpcErrorCode::ParseError => -32700,
            RpcErrorCode::InvalidRequest => -32600,
            RpcErrorCode::MethodNotFound => -32601,
            RpcErrorCode::InvalidParams => -32602,
            RpcErrorCode::InternalError => -32603,
            RpcErrorCode::Closed => 10,
            RpcErrorCode::HandlerError => 20,
        }
    }

    /// Map a wire value back to a known code
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -32700 => RpcErrorCode::ParseError,
            -32600 => RpcErrorCode::InvalidRequest,
            -32601 => RpcErrorCode::MethodNotFound,
            -32602 => RpcErrorCode::InvalidParams,
            -32603 => RpcErrorCode::InternalError,
            10 => RpcErrorCode::Closed,
            20 => RpcErrorCode::HandlerError,
            _ => return None,
        })
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Outcome of a call: a result value or an error object
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Success(Value),
    Failure(ErrorObject),
}

impl RpcResponse {
    /// Successful response carrying `result`
    pub fn ok(result: impl Into<Value>) -> Self {
        RpcResponse::Success(result.into())
    }

    /// Error response with one of the known codes
    pub fn error(code: RpcErrorCode, message: impl Into<String>) -> Self {
        RpcResponse::Failure(ErrorObject {
            code: code.code(),
            message: message.into(),
            data: None,
        })
    }

    /// Synthetic response for calls unwound by `JsonRpc::close`
    pub fn closed() -> Self {
        Self::error(
            RpcErrorCode::Closed,
            "No response received before JsonRpc::close()",
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RpcResponse::Failure(_))
    }

    /// Result value, `None` for errors
    pub fn result(&self) -> Option<&Value> {
        match self {
            RpcResponse::Success(value) => Some(value),
            RpcResponse::Failure(_) => None,
        }
    }

    /// Error object, `None` for successes
    pub fn error_object(&self) -> Option<&ErrorObject> {
        match self {
            RpcResponse::Success(_) => None,
            RpcResponse::Failure(error) => Some(error),
        }
    }

    /// Known error code, if this is an error with a recognised code
    pub fn error_code(&self) -> Option<RpcErrorCode> {
        self.error_object()
            .and_then(|error| RpcErrorCode::from_code(error.code))
    }
}

impl JsonRpcRequest {
    /// Build a call (`id` present) or notification (`id` absent)
    pub fn new(method: impl Into<String>, params: Value, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize JSON-RPC request: {}", e))
        })
    }
}

impl JsonRpcResponse {
    /// Create a new JSON-RPC success response
    pub fn new(result: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize JSON-RPC response: {}",
                e
            ))
        })
    }
}

impl JsonRpcError {
    /// Create a new JSON-RPC error response
    pub fn new(error: ErrorObject, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize JSON-RPC error: {}", e))
        })
    }
}

/// Classification of one inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Incoming {
    Error { id: Option<Value>, error: Value },
    Result { id: Option<Value>, result: Value },
    Call { method: String, params: Option<Value>, id: Value },
    Notify { method: String, params: Option<Value> },
    Malformed,
}

impl Incoming {
    /// Classify by field presence: error, then result, then method
    pub(crate) fn classify(mut object: Map<String, Value>) -> Self {
        let id = object.remove("id").filter(|id| !id.is_null());

        if let Some(error) = object.remove("error") {
            return Incoming::Error { id, error };
        }
        if let Some(result) = object.remove("result") {
            return Incoming::Result { id, result };
        }
        match object.remove("method") {
            Some(Value::String(method)) => {
                let params = object.remove("params");
                match id {
                    Some(id) => Incoming::Call { method, params, id },
                    None => Incoming::Notify { method, params },
                }
            }
            _ => Incoming::Malformed,
        }
    }
}

/// Key under which a pending call is stored, from a response id
pub(crate) fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
