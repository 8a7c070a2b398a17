use super::{DirectoryProvider, Participant, ParticipantRef, Roster};
use crate::status::{ConnectionState, ConnectionStatus};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

const LOCAL_ID_LENGTH: usize = 25;
const LOOPBACK_LOCATION: &str = "127.0.0.1";

/// Offline directory with a generated local participant
///
/// Reports `Connected` from the start; remote participants are only ever
/// the fakes added through [`add_fake_participant`](Self::add_fake_participant).
pub struct StandaloneDirectory {
    roster: Roster,
    status: ConnectionStatus,
}

impl StandaloneDirectory {
    pub fn new() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(LOCAL_ID_LENGTH)
            .map(char::from)
            .collect();

        let local = Arc::new(RwLock::new(Participant {
            id,
            is_local: true,
            active: true,
            screen_name: "Fake Local Participant".to_string(),
            server_location: LOOPBACK_LOCATION.to_string(),
            ..Default::default()
        }));

        let roster = Roster::new();
        roster.set_local(Arc::clone(&local));
        roster.upsert(local);

        let status = ConnectionStatus::new();
        status.set_status(ConnectionState::Connected);

        Self { roster, status }
    }

    /// Add a fake remote participant and announce it
    pub fn add_fake_participant(&self, remote_id: &str) -> ParticipantRef {
        let participant = Arc::new(RwLock::new(Participant {
            id: remote_id.to_string(),
            active: true,
            screen_name: format!("Fake Participant ({})", remote_id),
            server_location: LOOPBACK_LOCATION.to_string(),
            ..Default::default()
        }));

        debug!("Adding fake participant {}", remote_id);
        self.roster.upsert(Arc::clone(&participant));
        self.roster.on_participant_joined.broadcast(&participant);
        participant
    }

    /// Remove a participant and announce it; false if unknown
    pub fn remove_participant(&self, id: &str) -> bool {
        match self.roster.remove(id) {
            Some(participant) => {
                participant.write().active = false;
                self.roster.on_participant_left.broadcast(&participant);
                true
            }
            None => false,
        }
    }
}

impl Default for StandaloneDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryProvider for StandaloneDirectory {
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
    use parking_lot::Mutex;

    #[test]
    fn test_local_participant_defaults() {
        let directory = StandaloneDirectory::new();
        let local = directory.local_participant().unwrap();
        let local = local.read();

        assert_eq!(local.id.len(), LOCAL_ID_LENGTH);
        assert!(local.id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(local.is_local && local.active);
        assert_eq!(local.server_location, "127.0.0.1");
        assert_eq!(directory.status().status(), ConnectionState::Connected);
    }

    #[test]
    fn test_fake_participants_join_and_leave() {
        let directory = StandaloneDirectory::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&events);
        directory
            .roster()
            .on_participant_joined
            .add(move |p| sink.lock().push(format!("joined:{}", p.read().id)));
        let sink = Arc::clone(&events);
        directory
            .roster()
            .on_participant_left
            .add(move |p| sink.lock().push(format!("left:{}", p.read().id)));

        let fake = directory.add_fake_participant("remote-1");
        assert_eq!(fake.read().screen_name, "Fake Participant (remote-1)");
        assert_eq!(directory.participants().len(), 2);

        assert!(directory.remove_participant("remote-1"));
        assert!(!directory.remove_participant("remote-1"));
        assert!(!fake.read().active);

        assert_eq!(*events.lock(), vec!["joined:remote-1", "left:remote-1"]);
    }
}
