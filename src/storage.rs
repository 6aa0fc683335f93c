//! Local key-value persistence for per-device view state.
//!
//! Every blob lives under a fixed key with a `-v1` suffix so a future format
//! change can migrate by renaming the key.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::item::FeedKind;

pub const ALERTS_FILTERS_KEY: &str = "alerts-filters-v1";
pub const ALERTS_VIEW_KEY: &str = "alerts-view-v1";
pub const ALERTS_STATE_KEY: &str = "alerts-state-v1";
pub const COPILOT_FILTERS_KEY: &str = "copilot-feed-filters-v1";
pub const COPILOT_VIEW_KEY: &str = "copilot-feed-preferences-v1";
pub const COPILOT_STATE_KEY: &str = "copilot-feed-state-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageKeys {
    pub filters: &'static str,
    pub view: &'static str,
    pub triage: &'static str,
}

pub fn storage_keys(kind: FeedKind) -> StorageKeys {
    match kind {
        FeedKind::Alerts => StorageKeys {
            filters: ALERTS_FILTERS_KEY,
            view: ALERTS_VIEW_KEY,
            triage: ALERTS_STATE_KEY,
        },
        FeedKind::Copilot => StorageKeys {
            filters: COPILOT_FILTERS_KEY,
            view: COPILOT_VIEW_KEY,
            triage: COPILOT_STATE_KEY,
        },
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::Unavailable("sqlite connection lock poisoned".into()))?;
        Ok(f(&conn)?)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map(|_| ())
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        guard.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sqlite_store_round_trips_and_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("alerts-state-v1").unwrap(), None);

        store.set("alerts-state-v1", "{}").unwrap();
        store.set("alerts-state-v1", r#"{"alert:1":"saved"}"#).unwrap();
        assert_eq!(
            store.get("alerts-state-v1").unwrap().as_deref(),
            Some(r#"{"alert:1":"saved"}"#)
        );

        store.remove("alerts-state-v1").unwrap();
        assert_eq!(store.get("alerts-state-v1").unwrap(), None);
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pmd-local.sqlite");

        SqliteStore::open(&path)
            .unwrap()
            .set(ALERTS_VIEW_KEY, r#"{"density":"compact"}"#)
            .unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(ALERTS_VIEW_KEY).unwrap().as_deref(),
            Some(r#"{"density":"compact"}"#)
        );
    }

    #[test]
    fn storage_keys_are_versioned_per_feed() {
        let alerts = storage_keys(FeedKind::Alerts);
        let copilot = storage_keys(FeedKind::Copilot);
        for key in [
            alerts.filters,
            alerts.view,
            alerts.triage,
            copilot.filters,
            copilot.view,
            copilot.triage,
        ] {
            assert!(key.ends_with("-v1"), "{key}");
        }
        assert_ne!(alerts.triage, copilot.triage);
    }
}
