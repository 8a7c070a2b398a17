//! Participant directory: who is in the world and where they are hosted
//!
//! Two providers share the same capability surface ([`DirectoryProvider`]):
//! [`RemoteDirectory`] mirrors a directory service over JSON-RPC, and
//! [`StandaloneDirectory`] fakes a roster for offline sessions. Pick one
//! with [`create_directory`].

mod remote;
mod standalone;

pub use remote::{DirectoryHandler, RemoteDirectory};
pub use standalone::StandaloneDirectory;

use crate::config::{DirectoryConfig, DirectoryKind};
use crate::delegate::Delegate;
use crate::status::ConnectionStatus;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Shared, mutable participant record
pub type ParticipantRef = Arc<RwLock<Participant>>;

/// One participant as reported by the directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub is_local: bool,
    pub active: bool,
    pub screen_name: String,
    pub server_location: String,
    pub is_publishing_media: bool,
    /// Free-form properties; the directory can add keys but never removes them
    pub data: BTreeMap<String, String>,
}

impl Participant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Apply the fields present in a directory update
    ///
    /// Absent fields keep their current value. Non-string `data` values are
    /// stored as their JSON text.
    pub fn apply_update(&mut self, update: &Map<String, Value>) {
        if let Some(active) = update.get("active").and_then(Value::as_bool) {
            self.active = active;
        }
        if let Some(name) = update.get("screenName").and_then(Value::as_str) {
            self.screen_name = name.to_string();
        }
        if let Some(location) = update.get("serverLocation").and_then(Value::as_str) {
            self.server_location = location.to_string();
        }
        if let Some(publishing) = update.get("isPublishingMedia").and_then(Value::as_bool) {
            self.is_publishing_media = publishing;
        }
        if let Some(data) = update.get("data").and_then(Value::as_object) {
            for (key, value) in data {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                self.data.insert(key.clone(), value);
            }
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.data.get(name).map(String::as_str)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.data.insert(name.into(), value.into());
    }
}

#[derive(Default)]
struct RosterTable {
    order: Vec<String>,
    by_id: HashMap<String, ParticipantRef>,
    local: Option<ParticipantRef>,
}

/// Ordered participant table behind a single lock, plus roster events
///
/// Events are broadcast after the lock is released.
#[derive(Default)]
pub struct Roster {
    table: Mutex<RosterTable>,
    pub on_participant_joined: Delegate<ParticipantRef>,
    pub on_participant_left: Delegate<ParticipantRef>,
    pub on_participant_updated: Delegate<ParticipantRef>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Participants in insertion order
    pub fn participants(&self) -> Vec<ParticipantRef> {
        let table = self.table.lock();
        table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id).cloned())
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.table.lock().order.clone()
    }

    pub fn get(&self, id: &str) -> Option<ParticipantRef> {
        self.table.lock().by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.lock().by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.table.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn local(&self) -> Option<ParticipantRef> {
        self.table.lock().local.clone()
    }

    /// Set the local participant unless one is already set
    pub fn set_local(&self, participant: ParticipantRef) -> bool {
        let mut table = self.table.lock();
        if table.local.is_some() {
            return false;
        }
        participant.write().is_local = true;
        table.local = Some(participant);
        true
    }

    /// Insert or replace by id; a replaced entry keeps its position
    pub fn upsert(&self, participant: ParticipantRef) {
        let id = participant.read().id.clone();
        let mut table = self.table.lock();
        if table.by_id.insert(id.clone(), participant).is_none() {
            table.order.push(id);
        }
    }

    pub fn remove(&self, id: &str) -> Option<ParticipantRef> {
        let mut table = self.table.lock();
        let removed = table.by_id.remove(id)?;
        table.order.retain(|existing| existing != id);
        Some(removed)
    }

    /// Drop every entry, including the local participant
    pub fn clear(&self) {
        *self.table.lock() = RosterTable::default();
    }
}

/// Capability surface shared by every directory provider
pub trait DirectoryProvider: Send + Sync {
    /// Connection to the directory service
    fn status(&self) -> &ConnectionStatus;

    /// Participant table and its events
    fn roster(&self) -> &Roster;

    fn local_participant(&self) -> Option<ParticipantRef> {
        self.roster().local()
    }

    fn participants(&self) -> Vec<ParticipantRef> {
        self.roster().participants()
    }

    /// Participants hosted at `server_location`
    fn participants_on_server(&self, server_location: &str) -> Vec<ParticipantRef> {
        self.participants()
            .into_iter()
            .filter(|p| p.read().server_location == server_location)
            .collect()
    }

    /// Existing record for `id`, or a fresh record not yet in the roster
    fn participant_by_id(&self, id: &str) -> ParticipantRef {
        self.roster()
            .get(id)
            .unwrap_or_else(|| Arc::new(RwLock::new(Participant::new(id))))
    }
}

/// Build the provider selected by `config.kind`
pub fn create_directory(config: &DirectoryConfig) -> Arc<dyn DirectoryProvider> {
    match config.kind {
        DirectoryKind::Standalone => Arc::new(StandaloneDirectory::new()),
        DirectoryKind::Remote => Arc::new(RemoteDirectory::new()),
    }
}
