// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed storage for the sync server.
//!
//! The [`Database`] struct provides all data access operations for the
//! key-value table (sync states, document snapshots), photo rows, the entity
//! table used for conflict detection and the server change log.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

use crate::change::{EntityKey, EntityRecord, LoggedChange, SyncChange};
use crate::doc::Fields;
use crate::error::{Error, Result};
use crate::photo::{validate_photo_fields, PhotoMetadata};

/// SQL schema for the sync database.
pub const SCHEMA: &str = r#"
-- Namespaced key-value pairs (sync states, document snapshots)
CREATE TABLE IF NOT EXISTS kv (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);

-- Photo metadata rows, one per captured photo
CREATE TABLE IF NOT EXISTS photos (
    id TEXT PRIMARY KEY,
    report_id TEXT NOT NULL,
    photo_type TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL DEFAULT '',
    caption TEXT NOT NULL DEFAULT '',
    date_taken TEXT NOT NULL DEFAULT '',
    latitude REAL,
    longitude REAL,
    is_offline INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT
);

-- Server view of every synced entity
CREATE TABLE IF NOT EXISTS entities (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (entity_type, entity_id)
);

-- Accepted changes in server order
CREATE TABLE IF NOT EXISTS change_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    server_timestamp INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    device_id TEXT NOT NULL,
    change TEXT NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_photos_report ON photos(report_id);
CREATE INDEX IF NOT EXISTS idx_change_log_ts ON change_log(server_timestamp);
"#;

/// Parse a string value from the database, returning a rusqlite error on parse failure.
fn parse_db<T: std::str::FromStr>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!(
                "invalid value '{value}' in column '{column}'"
            ))),
        )
    })
}

/// Parse a JSON column from the database.
fn parse_json<T: serde::de::DeserializeOwned>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    serde_json::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!("invalid JSON in column '{column}': {e}"))),
        )
    })
}

const PHOTO_COLUMNS: &str = "id, report_id, photo_type, url, caption, date_taken, latitude,
     longitude, is_offline, status, error_message";

fn photo_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<PhotoMetadata, rusqlite::Error> {
    let status: String = row.get(9)?;
    Ok(PhotoMetadata {
        id: row.get(0)?,
        report_id: row.get(1)?,
        photo_type: row.get(2)?,
        url: row.get(3)?,
        caption: row.get(4)?,
        date_taken: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        is_offline: row.get(8)?,
        status: parse_db(&status, "status")?,
        error_message: row.get(10)?,
    })
}

/// SQLite database connection with sync store operations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database connection at the given path, creating the schema if needed.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(SCHEMA)?;
        Ok(Database { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Database { conn })
    }

    // Key-value

    /// Get a value by namespace and key.
    pub fn kv_get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or replace a value.
    pub fn kv_set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE SET
                 value = excluded.value, updated_at = excluded.updated_at",
            params![namespace, key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // Photos

    /// Get all photos for a report, ordered by id.
    pub fn get_photos_by_report_id(&self, report_id: &str) -> Result<Vec<PhotoMetadata>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE report_id = ?1 ORDER BY id"
        ))?;
        let photos = stmt
            .query_map(params![report_id], photo_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(photos)
    }

    /// Get a photo by ID.
    pub fn get_photo(&self, id: &str) -> Result<PhotoMetadata> {
        let photo = self
            .conn
            .query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?1"),
                params![id],
                photo_from_row,
            )
            .optional()?;
        photo.ok_or_else(|| Error::RecordNotFound(format!("photo '{id}'")))
    }

    /// Create a photo row.
    pub fn create_photo(&self, photo: &PhotoMetadata) -> Result<()> {
        if photo.id.is_empty() || photo.report_id.is_empty() {
            return Err(Error::InvalidInput("photo requires an id and a reportId".into()));
        }
        self.conn.execute(
            &format!(
                "INSERT INTO photos ({PHOTO_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                photo.id,
                photo.report_id,
                photo.photo_type,
                photo.url,
                photo.caption,
                photo.date_taken,
                photo.latitude,
                photo.longitude,
                photo.is_offline,
                photo.status.as_str(),
                photo.error_message,
            ],
        )?;
        Ok(())
    }

    /// Merge named fields into an existing photo row.
    pub fn update_photo(&self, id: &str, fields: &Fields) -> Result<PhotoMetadata> {
        validate_photo_fields(fields)?;
        let current = self.get_photo(id)?;

        let mut merged = match serde_json::to_value(&current)? {
            Value::Object(map) => map,
            _ => return Err(Error::CorruptedData(format!("photo '{id}' is not an object"))),
        };
        for (name, value) in fields {
            merged.insert(name.clone(), value.clone());
        }
        let mut photo: PhotoMetadata = serde_json::from_value(Value::Object(merged))?;
        photo.id = current.id;

        self.conn.execute(
            "UPDATE photos SET report_id = ?2, photo_type = ?3, url = ?4, caption = ?5,
                 date_taken = ?6, latitude = ?7, longitude = ?8, is_offline = ?9,
                 status = ?10, error_message = ?11
             WHERE id = ?1",
            params![
                photo.id,
                photo.report_id,
                photo.photo_type,
                photo.url,
                photo.caption,
                photo.date_taken,
                photo.latitude,
                photo.longitude,
                photo.is_offline,
                photo.status.as_str(),
                photo.error_message,
            ],
        )?;
        Ok(photo)
    }

    // Entities

    /// Get the server view of an entity, if it has ever been written.
    pub fn get_entity(&self, key: &EntityKey) -> Result<Option<EntityRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT entity_type, entity_id, data, updated_at, deleted
                 FROM entities WHERE entity_type = ?1 AND entity_id = ?2",
                params![key.entity_type, key.entity_id],
                |row| {
                    let data: String = row.get(2)?;
                    Ok(EntityRecord {
                        entity_type: row.get(0)?,
                        entity_id: row.get(1)?,
                        data: parse_json(&data, "data")?,
                        updated_at: row.get(3)?,
                        deleted: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Insert or replace an entity.
    pub fn put_entity(&self, record: &EntityRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entities (entity_type, entity_id, data, updated_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                 data = excluded.data,
                 updated_at = excluded.updated_at,
                 deleted = excluded.deleted",
            params![
                record.entity_type,
                record.entity_id,
                serde_json::to_string(&record.data)?,
                record.updated_at,
                record.deleted,
            ],
        )?;
        Ok(())
    }

    // Change log

    /// Append an accepted change at `now_ms`, or one past the newest logged
    /// timestamp if that is not earlier. Returns the timestamp used.
    pub fn append_change(
        &self,
        now_ms: i64,
        user_id: &str,
        device_id: &str,
        change: &SyncChange,
    ) -> Result<i64> {
        let newest: Option<i64> =
            self.conn.query_row("SELECT MAX(server_timestamp) FROM change_log", [], |row| row.get(0))?;
        let server_timestamp = newest.map_or(now_ms, |newest| now_ms.max(newest + 1));
        self.conn.execute(
            "INSERT INTO change_log (server_timestamp, user_id, device_id, change)
             VALUES (?1, ?2, ?3, ?4)",
            params![server_timestamp, user_id, device_id, serde_json::to_string(change)?],
        )?;
        Ok(server_timestamp)
    }

    /// Changes accepted strictly after `since` (ms), oldest first.
    pub fn changes_since(&self, since: i64, limit: usize) -> Result<Vec<LoggedChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, server_timestamp, user_id, device_id, change
             FROM change_log WHERE server_timestamp > ?1
             ORDER BY seq LIMIT ?2",
        )?;
        let changes = stmt
            .query_map(params![since, limit as i64], |row| {
                let change: String = row.get(4)?;
                Ok(LoggedChange {
                    seq: row.get(0)?,
                    server_timestamp: row.get(1)?,
                    user_id: row.get(2)?,
                    device_id: row.get(3)?,
                    change: parse_json(&change, "change")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(changes)
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
