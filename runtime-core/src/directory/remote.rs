use super::{DirectoryProvider, Participant, ParticipantRef, Roster};
use crate::channel::{Channel, HeartbeatChannel, WebSocketChannel, CLOSE_GOING_AWAY};
use crate::config::DirectoryConfig;
use crate::events::{EventBus, GlobalEvent};
use crate::rpc::{JsonRpc, RpcErrorCode, RpcHandler, RpcResponse};
use crate::status::{ConnectionState, ConnectionStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Answers the directory service's roster calls
///
/// Methods take their arguments as a JSON array:
/// `Joined [participant]`, `AddParticipants [participant…]`,
/// `RemoveParticipants [id…]`, `UpdateParticipants [participant…]`.
pub struct DirectoryHandler {
    roster: Arc<Roster>,
    status: Arc<ConnectionStatus>,
}

impl DirectoryHandler {
    fn participant_id(object: &Map<String, Value>) -> Option<&str> {
        object.get("id").and_then(Value::as_str)
    }

    fn record_for(&self, id: &str) -> ParticipantRef {
        self.roster
            .get(id)
            .unwrap_or_else(|| Arc::new(RwLock::new(Participant::new(id))))
    }

    fn joined(&self, object: &Map<String, Value>) -> RpcResponse {
        if self.roster.local().is_some() {
            error!("Joined received but the local participant is already set");
            return RpcResponse::error(RpcErrorCode::HandlerError, "LocalParticipant is already set");
        }
        let Some(id) = Self::participant_id(object) else {
            return RpcResponse::error(RpcErrorCode::InvalidParams, "Participant has no id");
        };

        let participant = self.record_for(id);
        participant.write().apply_update(object);
        if !self.roster.set_local(Arc::clone(&participant)) {
            return RpcResponse::error(RpcErrorCode::HandlerError, "LocalParticipant is already set");
        }
        info!("Joined directory as {}", id);

        self.status.set_status(ConnectionState::Connected);
        EventBus::broadcast_global(GlobalEvent::DirectoryConnected);
        self.roster.on_participant_joined.broadcast(&participant);
        RpcResponse::ok(true)
    }

    fn add_participants(&self, items: &[Value]) -> RpcResponse {
        for item in items {
            let Value::Object(object) = item else {
                return RpcResponse::error(
                    RpcErrorCode::HandlerError,
                    "AddParticipants Value is not an Object",
                );
            };
            let Some(id) = Self::participant_id(object) else {
                return RpcResponse::error(RpcErrorCode::InvalidParams, "Participant has no id");
            };

            let participant = self.record_for(id);
            participant.write().apply_update(object);
            self.roster.upsert(Arc::clone(&participant));
            debug!("Participant {} joined", id);
            self.roster.on_participant_joined.broadcast(&participant);
        }
        RpcResponse::ok(true)
    }

    fn remove_participants(&self, items: &[Value]) -> RpcResponse {
        let mut not_found = Vec::new();
        for item in items {
            let id = match item {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            };
            match self.roster.remove(&id) {
                Some(participant) => {
                    debug!("Participant {} left", id);
                    self.roster.on_participant_left.broadcast(&participant);
                }
                None => not_found.push(id),
            }
        }
        Self::not_found_response(not_found)
    }

    fn update_participants(&self, items: &[Value]) -> RpcResponse {
        let mut not_found = Vec::new();
        for item in items {
            let Value::Object(object) = item else {
                return RpcResponse::error(
                    RpcErrorCode::InvalidParams,
                    "Expected a Participant object",
                );
            };
            let id = Self::participant_id(object).unwrap_or_default();
            match self.roster.get(id) {
                Some(participant) => {
                    participant.write().apply_update(object);
                    self.roster.on_participant_updated.broadcast(&participant);
                }
                None => not_found.push(id.to_string()),
            }
        }
        Self::not_found_response(not_found)
    }

    fn not_found_response(not_found: Vec<String>) -> RpcResponse {
        if not_found.is_empty() {
            RpcResponse::ok(true)
        } else {
            RpcResponse::error(
                RpcErrorCode::InvalidParams,
                format!("Participant Id(s) not found: {}", not_found.join(", ")),
            )
        }
    }
}

#[async_trait]
impl RpcHandler for DirectoryHandler {
    async fn handle(&self, method: &str, params: Value) -> RpcResponse {
        debug!("Directory call {}", method);
        let items = match params {
            Value::Array(items) => items,
            _ => {
                return RpcResponse::error(
                    RpcErrorCode::InvalidParams,
                    format!("{} expects an array of params", method),
                )
            }
        };

        match method {
            "Joined" => match items.as_slice() {
                [Value::Object(object)] => self.joined(object),
                _ => RpcResponse::error(
                    RpcErrorCode::InvalidParams,
                    "Expected a single Participant object",
                ),
            },
            "AddParticipants" => self.add_participants(&items),
            "RemoveParticipants" => self.remove_participants(&items),
            "UpdateParticipants" => self.update_participants(&items),
            _ => RpcResponse::error(
                RpcErrorCode::MethodNotFound,
                format!("No method named '{}'", method),
            ),
        }
    }
}

struct DirectoryConnection {
    rpc: JsonRpc,
    channel: Arc<dyn Channel>,
}

/// Directory mirrored from a directory service over JSON-RPC
///
/// The service drives the roster by calling into [`DirectoryHandler`]; the
/// status turns `Connected` when it calls `Joined`.
pub struct RemoteDirectory {
    roster: Arc<Roster>,
    status: Arc<ConnectionStatus>,
    connection: Mutex<Option<DirectoryConnection>>,
}

impl RemoteDirectory {
    pub fn new() -> Self {
        Self {
            roster: Arc::new(Roster::new()),
            status: Arc::new(ConnectionStatus::new()),
            connection: Mutex::new(None),
        }
    }

    /// Handler serving this directory's roster
    pub fn handler(&self) -> Arc<DirectoryHandler> {
        Arc::new(DirectoryHandler {
            roster: Arc::clone(&self.roster),
            status: Arc::clone(&self.status),
        })
    }

    /// Serve the roster over an already open channel
    pub fn attach(&self, channel: Arc<dyn Channel>) {
        let rpc = JsonRpc::new(Arc::clone(&channel), self.handler());
        self.status.set_status(ConnectionState::Connecting);
        self.replace_connection(DirectoryConnection { rpc, channel });
    }

    /// Connect to the directory service described by `config`
    ///
    /// Opens an authenticated WebSocket wrapped in a heartbeat. Socket errors
    /// move the status to `Failed`, socket closure to `Closed`.
    pub async fn connect(&self, config: &DirectoryConfig) -> Result<()> {
        config.validate()?;

        let mut socket = WebSocketChannel::new(config.url.clone());
        if let Some(token) = &config.token {
            socket = socket.with_bearer_token(token);
        }
        let socket = Arc::new(socket);
        let heartbeat = HeartbeatChannel::wrap(
            socket.clone(),
            Duration::from_millis(config.heartbeat_interval_ms),
        );

        let status = Arc::downgrade(&self.status);
        socket.on_error().add(move |e| {
            error!("Directory WebSocket error: {}", e);
            if let Some(status) = status.upgrade() {
                status.set_status(ConnectionState::Failed);
            }
            EventBus::broadcast_global(GlobalEvent::DirectoryLost);
        });

        let status = Arc::downgrade(&self.status);
        let timer = Arc::downgrade(&heartbeat);
        socket.on_closed().add(move |(code, reason)| {
            info!("Directory WebSocket closed: {} {}", code, reason);
            if let Some(status) = status.upgrade() {
                status.set_status(ConnectionState::Closed);
            }
            if let Some(heartbeat) = timer.upgrade() {
                heartbeat.stop();
            }
            EventBus::broadcast_global(GlobalEvent::DirectoryLost);
        });

        let channel: Arc<dyn Channel> = heartbeat;
        let rpc = JsonRpc::new(Arc::clone(&channel), self.handler());
        self.status.set_status(ConnectionState::Connecting);
        self.replace_connection(DirectoryConnection { rpc, channel });

        socket.open().await.map_err(|e| {
            self.status.set_status(ConnectionState::Failed);
            Error::DirectoryError(format!("Failed to reach directory: {}", e))
        })
    }

    /// Unwind pending calls and close the channel
    pub fn disconnect(&self) {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.rpc.close();
            connection
                .channel
                .close(CLOSE_GOING_AWAY, "Client is disconnecting");
            self.status.set_status(ConnectionState::Closed);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn replace_connection(&self, connection: DirectoryConnection) {
        let previous = self.connection.lock().replace(connection);
        if let Some(previous) = previous {
            warn!("Replacing an existing directory connection");
            previous.rpc.close();
            previous.channel.close(CLOSE_GOING_AWAY, "Reconnecting");
        }
    }
}

impl Default for RemoteDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryProvider for RemoteDirectory {
    fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    fn roster(&self) -> &Roster {
        &self.roster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> (RemoteDirectory, Arc<DirectoryHandler>) {
        let directory = RemoteDirectory::new();
        let handler = directory.handler();
        (directory, handler)
    }

    #[tokio::test]
    async fn test_joined_sets_local_and_connects() {
        let (directory, handler) = handler();

        let response = handler
            .handle("Joined", json!([{"id": "me", "screenName": "Me", "serverLocation": "10.0.0.1"}]))
            .await;

        assert_eq!(response, RpcResponse::ok(true));
        let local = directory.local_participant().unwrap();
        assert_eq!(local.read().screen_name, "Me");
        assert!(local.read().is_local);
        assert_eq!(directory.status().status(), ConnectionState::Connected);

        let again = handler.handle("Joined", json!([{"id": "me"}])).await;
        assert_eq!(again.error_code(), Some(RpcErrorCode::HandlerError));
    }

    #[tokio::test]
    async fn test_joined_requires_single_object() {
        let (_directory, handler) = handler();
        let response = handler.handle("Joined", json!([{"id": "a"}, {"id": "b"}])).await;
        assert_eq!(response.error_code(), Some(RpcErrorCode::InvalidParams));
    }

    #[tokio::test]
    async fn test_add_rejects_non_objects() {
        let (directory, handler) = handler();
        let response = handler
            .handle("AddParticipants", json!([{"id": "a"}, "b"]))
            .await;

        assert_eq!(response.error_code(), Some(RpcErrorCode::HandlerError));
        assert_eq!(directory.roster().ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_remove_reports_unknown_ids() {
        let (directory, handler) = handler();
        handler
            .handle("AddParticipants", json!([{"id": "a"}, {"id": "b"}]))
            .await;

        let response = handler
            .handle("RemoveParticipants", json!(["a", "x", "y"]))
            .await;

        assert_eq!(
            response.error_object().unwrap().message,
            "Participant Id(s) not found: x, y"
        );
        assert_eq!(response.error_code(), Some(RpcErrorCode::InvalidParams));
        assert_eq!(directory.roster().ids(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_update_applies_fields_and_fires_event() {
        let (directory, handler) = handler();
        handler.handle("AddParticipants", json!([{"id": "a"}])).await;
        let updated = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updated);
        directory
            .roster()
            .on_participant_updated
            .add(move |p| sink.lock().push(p.read().id.clone()));

        let response = handler
            .handle("UpdateParticipants", json!([{"id": "a", "active": true}, {"id": "z"}]))
            .await;

        assert_eq!(response.error_code(), Some(RpcErrorCode::InvalidParams));
        assert!(directory.roster().get("a").unwrap().read().active);
        assert_eq!(*updated.lock(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_directory, handler) = handler();
        let response = handler.handle("Explode", json!([])).await;
        assert_eq!(
            response.error_object().unwrap().message,
            "No method named 'Explode'"
        );
    }

    #[tokio::test]
    async fn test_params_must_be_array() {
        let (_directory, handler) = handler();
        let response = handler.handle("AddParticipants", json!({"id": "a"})).await;
        assert_eq!(response.error_code(), Some(RpcErrorCode::InvalidParams));
    }

    #[tokio::test]
    async fn test_connect_failure_sets_failed() {
        let directory = RemoteDirectory::new();
        let config = DirectoryConfig {
            kind: crate::config::DirectoryKind::Remote,
            url: "ws://127.0.0.1:1/directory".into(),
            token: Some("secret".into()),
            ..Default::default()
        };

        assert!(directory.connect(&config).await.is_err());
        assert_eq!(directory.status().status(), ConnectionState::Failed);

        directory.disconnect();
        assert!(!directory.is_attached());
    }
}
