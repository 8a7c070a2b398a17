//! Remote directory driven by a directory service over a paired channel

use parking_lot::Mutex;
use passage_core::channel::PairedChannel;
use passage_core::directory::{DirectoryProvider, RemoteDirectory};
use passage_core::rpc::{EmptyHandler, JsonRpc, RpcErrorCode, RpcResponse};
use passage_core::status::ConnectionState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

/// A directory attached to one half of a pair, and a service engine on the other
fn setup() -> (Arc<RemoteDirectory>, JsonRpc) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (client_side, service_side) = PairedChannel::pair();
    let directory = Arc::new(RemoteDirectory::new());
    directory.attach(client_side);
    let service = JsonRpc::new(service_side, Arc::new(EmptyHandler));
    (directory, service)
}

fn record_ids(
    delegate: &passage_core::Delegate<passage_core::directory::ParticipantRef>,
) -> Arc<Mutex<Vec<String>>> {
    let ids = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ids);
    delegate.add(move |p| sink.lock().push(p.read().id.clone()));
    ids
}

#[tokio::test]
async fn add_participants_fires_joined_in_order() {
    let (directory, service) = setup();
    let joined = record_ids(&directory.roster().on_participant_joined);

    let response = service
        .call(
            "AddParticipants",
            json!([
                {"id": "local", "screenName": "Local", "serverLocation": "10.0.0.1"},
                {"id": "remote", "screenName": "Remote", "serverLocation": "10.0.0.2"}
            ]),
        )
        .wait(WAIT)
        .await
        .unwrap();

    assert_eq!(response, RpcResponse::ok(true));
    assert_eq!(directory.roster().ids(), vec!["local", "remote"]);
    assert_eq!(*joined.lock(), vec!["local", "remote"]);

    let participants = directory.participants();
    assert_eq!(participants[1].read().screen_name, "Remote");
    assert_eq!(directory.participants_on_server("10.0.0.2").len(), 1);
}

#[tokio::test]
async fn joined_marks_directory_connected() {
    let (directory, service) = setup();
    assert_eq!(directory.status().status(), ConnectionState::Connecting);

    let response = service
        .call("Joined", json!([{"id": "me", "active": true}]))
        .wait(WAIT)
        .await
        .unwrap();

    assert_eq!(response, RpcResponse::ok(true));
    assert_eq!(directory.status().status(), ConnectionState::Connected);
    assert_eq!(directory.local_participant().unwrap().read().id, "me");
}

#[tokio::test]
async fn remove_and_update_participants() {
    let (directory, service) = setup();
    let left = record_ids(&directory.roster().on_participant_left);
    let updated = record_ids(&directory.roster().on_participant_updated);

    service
        .call("AddParticipants", json!([{"id": "a"}, {"id": "b"}, {"id": "c"}]))
        .wait(WAIT)
        .await
        .unwrap();

    let update = service
        .call("UpdateParticipants", json!([{"id": "b", "data": {"hat": "red"}}]))
        .wait(WAIT)
        .await
        .unwrap();
    assert_eq!(update, RpcResponse::ok(true));
    assert_eq!(
        directory.roster().get("b").unwrap().read().property("hat"),
        Some("red")
    );

    let remove = service
        .call("RemoveParticipants", json!(["a", "ghost"]))
        .wait(WAIT)
        .await
        .unwrap();
    assert_eq!(remove.error_code(), Some(RpcErrorCode::InvalidParams));

    assert_eq!(directory.roster().ids(), vec!["b", "c"]);
    assert_eq!(*left.lock(), vec!["a"]);
    assert_eq!(*updated.lock(), vec!["b"]);
}

#[tokio::test]
async fn disconnect_closes_directory() {
    let (directory, _service) = setup();
    directory.disconnect();

    assert_eq!(directory.status().status(), ConnectionState::Closed);
    assert!(!directory.is_attached());
}
