// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Collaborator interfaces the sync engine persists through.
//!
//! All methods are blocking; async callers run them on a blocking thread.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::change::{EntityKey, EntityRecord, LoggedChange, SyncChange};
use crate::db::Database;
use crate::doc::Fields;
use crate::error::{Error, Result};
use crate::photo::{validate_photo_fields, PhotoMetadata};

/// Durable namespaced key-value store.
pub trait KvStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
}

/// Relational photo rows.
pub trait PhotoRepository: Send + Sync {
    fn get_photos_by_report_id(&self, report_id: &str) -> Result<Vec<PhotoMetadata>>;
    fn create_photo(&self, photo: &PhotoMetadata) -> Result<()>;
    fn update_photo(&self, id: &str, fields: &Fields) -> Result<PhotoMetadata>;
}

/// Server view of synced entities, consulted for conflict detection.
pub trait EntityStore: Send + Sync {
    fn get_entity(&self, key: &EntityKey) -> Result<Option<EntityRecord>>;
    fn put_entity(&self, record: &EntityRecord) -> Result<()>;
}

/// Ordered log of accepted changes.
///
/// Server timestamps are unique and grow with log order, so the newest
/// timestamp a reader has seen is a safe cursor.
pub trait ChangeSource: Send + Sync {
    /// Appends at `now_ms`, or just past the newest entry when the clock has
    /// not moved on. Returns the timestamp the change was logged at.
    fn append_change(
        &self,
        now_ms: i64,
        user_id: &str,
        device_id: &str,
        change: &SyncChange,
    ) -> Result<i64>;
    fn changes_since(&self, since: i64, limit: usize) -> Result<Vec<LoggedChange>>;
}

/// Everything the server needs from its backing store.
pub trait SyncStore: KvStore + PhotoRepository + EntityStore + ChangeSource {}

impl<T: KvStore + PhotoRepository + EntityStore + ChangeSource> SyncStore for T {}

/// [`SyncStore`] over a single SQLite connection.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(SqliteStore { db: Mutex::new(Database::open(path)?) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(SqliteStore { db: Mutex::new(Database::open_in_memory()?) })
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvStore for SqliteStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        self.db().kv_get(namespace, key)
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.db().kv_set(namespace, key, value)
    }
}

impl PhotoRepository for SqliteStore {
    fn get_photos_by_report_id(&self, report_id: &str) -> Result<Vec<PhotoMetadata>> {
        self.db().get_photos_by_report_id(report_id)
    }

    fn create_photo(&self, photo: &PhotoMetadata) -> Result<()> {
        self.db().create_photo(photo)
    }

    fn update_photo(&self, id: &str, fields: &Fields) -> Result<PhotoMetadata> {
        self.db().update_photo(id, fields)
    }
}

impl EntityStore for SqliteStore {
    fn get_entity(&self, key: &EntityKey) -> Result<Option<EntityRecord>> {
        self.db().get_entity(key)
    }

    fn put_entity(&self, record: &EntityRecord) -> Result<()> {
        self.db().put_entity(record)
    }
}

impl ChangeSource for SqliteStore {
    fn append_change(
        &self,
        now_ms: i64,
        user_id: &str,
        device_id: &str,
        change: &SyncChange,
    ) -> Result<i64> {
        self.db().append_change(now_ms, user_id, device_id, change)
    }

    fn changes_since(&self, since: i64, limit: usize) -> Result<Vec<LoggedChange>> {
        self.db().changes_since(since, limit)
    }
}

#[derive(Default)]
struct MemoryInner {
    kv: HashMap<(String, String), String>,
    photos: BTreeMap<String, PhotoMetadata>,
    entities: HashMap<EntityKey, EntityRecord>,
    log: Vec<LoggedChange>,
}

/// In-process [`SyncStore`] whose availability can be switched off, for
/// tests and ephemeral servers.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore { inner: Mutex::new(MemoryInner::default()), available: AtomicBool::new(true) }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every call fails with [`Error::StoreUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn inner(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory store switched off".into()));
        }
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self.inner()?.kv.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.inner()?.kv.insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}

impl PhotoRepository for MemoryStore {
    fn get_photos_by_report_id(&self, report_id: &str) -> Result<Vec<PhotoMetadata>> {
        Ok(self.inner()?.photos.values().filter(|p| p.report_id == report_id).cloned().collect())
    }

    fn create_photo(&self, photo: &PhotoMetadata) -> Result<()> {
        if photo.id.is_empty() || photo.report_id.is_empty() {
            return Err(Error::InvalidInput("photo requires an id and a reportId".into()));
        }
        let mut inner = self.inner()?;
        if inner.photos.contains_key(&photo.id) {
            return Err(Error::InvalidInput(format!("photo '{}' already exists", photo.id)));
        }
        inner.photos.insert(photo.id.clone(), photo.clone());
        Ok(())
    }

    fn update_photo(&self, id: &str, fields: &Fields) -> Result<PhotoMetadata> {
        validate_photo_fields(fields)?;
        let mut inner = self.inner()?;
        let current = inner.photos.get(id).ok_or_else(|| Error::RecordNotFound(format!("photo '{id}'")))?;

        let mut merged = match serde_json::to_value(current)? {
            serde_json::Value::Object(map) => map,
            _ => return Err(Error::CorruptedData(format!("photo '{id}' is not an object"))),
        };
        for (name, value) in fields {
            merged.insert(name.clone(), value.clone());
        }
        let mut photo: PhotoMetadata = serde_json::from_value(serde_json::Value::Object(merged))?;
        photo.id = id.to_string();
        inner.photos.insert(id.to_string(), photo.clone());
        Ok(photo)
    }
}

impl EntityStore for MemoryStore {
    fn get_entity(&self, key: &EntityKey) -> Result<Option<EntityRecord>> {
        Ok(self.inner()?.entities.get(key).cloned())
    }

    fn put_entity(&self, record: &EntityRecord) -> Result<()> {
        let key = EntityKey::new(&record.entity_type, &record.entity_id);
        self.inner()?.entities.insert(key, record.clone());
        Ok(())
    }
}

impl ChangeSource for MemoryStore {
    fn append_change(
        &self,
        now_ms: i64,
        user_id: &str,
        device_id: &str,
        change: &SyncChange,
    ) -> Result<i64> {
        let mut inner = self.inner()?;
        let seq = inner.log.len() as i64 + 1;
        let server_timestamp = inner.log.last().map_or(now_ms, |last| now_ms.max(last.server_timestamp + 1));
        inner.log.push(LoggedChange {
            seq,
            server_timestamp,
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            change: change.clone(),
        });
        Ok(server_timestamp)
    }

    fn changes_since(&self, since: i64, limit: usize) -> Result<Vec<LoggedChange>> {
        Ok(self.inner()?.log.iter().filter(|c| c.server_timestamp > since).take(limit).cloned().collect())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
