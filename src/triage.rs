//! Per-device saved/dismissed flags, persisted as one JSON map.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{KeyValueStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageState {
    Pending,
    Saved,
    Dismissed,
}

impl TriageState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "saved" => Some(Self::Saved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Saved => "saved",
            Self::Dismissed => "dismissed",
        }
    }

    fn mark(self) -> Option<TriageMark> {
        match self {
            Self::Pending => None,
            Self::Saved => Some(TriageMark::Saved),
            Self::Dismissed => Some(TriageMark::Dismissed),
        }
    }
}

/// A stored flag. Pending has no variant: it is the absence of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageMark {
    Saved,
    Dismissed,
}

impl From<TriageMark> for TriageState {
    fn from(mark: TriageMark) -> Self {
        match mark {
            TriageMark::Saved => Self::Saved,
            TriageMark::Dismissed => Self::Dismissed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriageMap {
    entries: BTreeMap<String, TriageMark>,
}

impl TriageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_of(&self, key: &str) -> TriageState {
        self.entries
            .get(key)
            .map(|mark| TriageState::from(*mark))
            .unwrap_or(TriageState::Pending)
    }

    pub fn set_state(&mut self, key: impl Into<String>, state: TriageState) {
        let key = key.into();
        match state.mark() {
            Some(mark) => {
                self.entries.insert(key, mark);
            }
            None => {
                self.entries.remove(&key);
            }
        }
    }

    pub fn bulk_set_state<I, K>(&mut self, keys: I, state: TriageState)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        for key in keys {
            self.set_state(key, state);
        }
    }

    /// Stored keys carrying `state`. Always empty for pending.
    pub fn keys_with(&self, state: TriageState) -> impl Iterator<Item = &str> + '_ {
        let wanted = state.mark();
        self.entries
            .iter()
            .filter(move |(_, mark)| Some(**mark) == wanted)
            .map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone)]
pub struct LocalTriageStore {
    store: Arc<dyn KeyValueStore>,
    storage_key: &'static str,
}

impl LocalTriageStore {
    pub fn new(store: Arc<dyn KeyValueStore>, storage_key: &'static str) -> Self {
        Self { store, storage_key }
    }

    /// Missing or corrupt data loads as an empty map. Legacy `pending` entries and
    /// unrecognized states are dropped.
    pub fn load(&self) -> TriageMap {
        let raw = match self.store.get(self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return TriageMap::new(),
            Err(err) => {
                warn!(
                    component = "triage",
                    event = "triage.load.error",
                    storage_key = self.storage_key,
                    error = %err
                );
                return TriageMap::new();
            }
        };

        let parsed = match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(
                    component = "triage",
                    event = "triage.load.corrupt",
                    storage_key = self.storage_key,
                    error = %err
                );
                return TriageMap::new();
            }
        };

        // Unknown states are skipped one by one; they never discard the other marks.
        let mut map = TriageMap::new();
        let mut skipped = 0usize;
        for (key, value) in parsed {
            match value.as_str().and_then(TriageState::parse) {
                Some(state) => map.set_state(key, state),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(
                component = "triage",
                event = "triage.load.skipped",
                storage_key = self.storage_key,
                skipped
            );
        }
        map
    }

    /// An empty map removes the key. A failed write is logged and ignored; the state then
    /// lives for this session only.
    pub fn save(&self, map: &TriageMap) {
        if let Err(err) = self.try_save(map) {
            warn!(
                component = "triage",
                event = "triage.save.error",
                storage_key = self.storage_key,
                entries = map.len(),
                error = %err
            );
        }
    }

    fn try_save(&self, map: &TriageMap) -> Result<(), StorageError> {
        if map.is_empty() {
            return self.store.remove(self.storage_key);
        }
        let payload = serde_json::to_string(map)?;
        self.store.set(self.storage_key, &payload)
    }
}
