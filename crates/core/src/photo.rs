// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Photo metadata for a report, replicated field by field.
//!
//! Each photo is a record of the report's document, so concurrent edits to
//! different fields of the same photo both survive a merge.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::doc::{Document, Fields, SyncableDocument};
use crate::error::{Error, Result};
use crate::hlc::{ClockSource, SystemClock};

/// Upload/sync progress of a captured photo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    /// Captured, not yet uploaded.
    #[default]
    Pending,
    /// Upload in flight.
    Syncing,
    /// Stored server-side.
    Synced,
    /// Last upload attempt failed; see `error_message`.
    Error,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Syncing => "syncing",
            PhotoStatus::Synced => "synced",
            PhotoStatus::Error => "error",
        }
    }

    /// True for photos that still need an upload attempt.
    pub fn needs_upload(&self) -> bool {
        matches!(self, PhotoStatus::Pending | PhotoStatus::Error)
    }
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PhotoStatus {
    type Err = Error;

    /// Accepts the wire spelling only, as serde does.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PhotoStatus::Pending),
            "syncing" => Ok(PhotoStatus::Syncing),
            "synced" => Ok(PhotoStatus::Synced),
            "error" => Ok(PhotoStatus::Error),
            _ => Err(Error::InvalidEnum {
                kind: "photo status",
                value: s.to_string(),
                valid: "pending, syncing, synced, error",
            }),
        }
    }
}

/// Metadata of one photo attached to a report.
///
/// Every field defaults so a record whose fields are still in flight from
/// another replica can be materialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PhotoMetadata {
    pub id: String,
    pub report_id: String,
    pub photo_type: String,
    pub url: String,
    pub caption: String,
    /// RFC 3339 capture time as reported by the device.
    pub date_taken: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_offline: bool,
    pub status: PhotoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Wire names of the fields a partial update may touch.
pub const PHOTO_FIELDS: &[&str] = &[
    "reportId",
    "photoType",
    "url",
    "caption",
    "dateTaken",
    "latitude",
    "longitude",
    "isOffline",
    "status",
    "errorMessage",
];

/// Rejects unknown fields and values a [`PhotoMetadata`] could not hold, so
/// every accepted update still materializes.
pub fn validate_photo_fields(fields: &Fields) -> Result<()> {
    for (name, value) in fields {
        if !PHOTO_FIELDS.contains(&name.as_str()) {
            return Err(Error::InvalidInput(format!("unknown photo field '{name}'")));
        }
        if name == "status" {
            let status = value
                .as_str()
                .ok_or_else(|| Error::InvalidInput("photo status must be a string".into()))?;
            status.parse::<PhotoStatus>()?;
        }
    }
    serde_json::from_value::<PhotoMetadata>(Value::Object(fields.clone()))
        .map_err(|e| Error::InvalidInput(format!("invalid photo fields: {e}")))?;
    Ok(())
}

/// Document id for a report's photo map.
pub fn photos_entity_id(report_id: &str) -> String {
    format!("report:{report_id}")
}

/// Replicated map of photo id to metadata for one report.
pub struct PhotoMap<C: ClockSource = SystemClock> {
    report_id: String,
    doc: SyncableDocument<C>,
}

impl PhotoMap<SystemClock> {
    pub fn new(report_id: impl Into<String>) -> Self {
        Self::with_clock(report_id, SystemClock)
    }
}

impl<C: ClockSource> PhotoMap<C> {
    pub fn with_clock(report_id: impl Into<String>, clock: C) -> Self {
        let report_id = report_id.into();
        let doc = SyncableDocument::with_clock(photos_entity_id(&report_id), clock);
        PhotoMap { report_id, doc }
    }

    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    /// Adds (or re-adds) a photo with all of its fields.
    pub fn add_photo(&mut self, photo: &PhotoMetadata) -> Result<Vec<u8>> {
        if photo.id.is_empty() {
            return Err(Error::InvalidInput("photo id must not be empty".into()));
        }
        let mut fields = match serde_json::to_value(photo)? {
            Value::Object(map) => map,
            _ => return Err(Error::CorruptedData("photo did not serialize to an object".into())),
        };
        fields.remove("id");
        if !fields.contains_key("errorMessage") {
            fields.insert("errorMessage".into(), Value::Null);
        }

        let mut update = self.doc.write_fields(&photo.id, fields);
        update.entries.extend(self.doc.set_presence(&photo.id, true).entries);
        update.encode()
    }

    /// Merges a partial update into an existing photo.
    ///
    /// Only the named fields are written; concurrent edits to other fields of
    /// the same photo are untouched.
    pub fn update_photo_metadata(&mut self, id: &str, fields: Fields) -> Result<Vec<u8>> {
        if !self.doc.is_present(id) {
            return Err(Error::RecordNotFound(format!("photo '{id}' in report '{}'", self.report_id)));
        }
        validate_photo_fields(&fields)?;
        self.doc.write_fields(id, fields).encode()
    }

    /// Removes a photo. Its fields stay in the document so a concurrent
    /// re-add keeps them.
    pub fn remove_photo(&mut self, id: &str) -> Result<Vec<u8>> {
        if !self.doc.is_present(id) {
            return Err(Error::RecordNotFound(format!("photo '{id}' in report '{}'", self.report_id)));
        }
        self.doc.set_presence(id, false).encode()
    }

    pub fn get_photo(&self, id: &str) -> Option<PhotoMetadata> {
        if !self.doc.is_present(id) {
            return None;
        }
        self.doc.fields(id).and_then(|fields| materialize(id, fields))
    }

    /// All current photos, ordered by id.
    pub fn get_all_photos(&self) -> Vec<PhotoMetadata> {
        self.doc.present_records().filter_map(|(id, fields)| materialize(id, fields)).collect()
    }

    /// Photos whose status is `pending` or `error`.
    pub fn get_pending_photos(&self) -> Vec<PhotoMetadata> {
        self.get_all_photos().into_iter().filter(|p| p.status.needs_upload()).collect()
    }

    pub fn document(&self) -> &SyncableDocument<C> {
        &self.doc
    }
}

fn materialize(id: &str, mut fields: Fields) -> Option<PhotoMetadata> {
    fields.insert("id".into(), Value::String(id.to_string()));
    match serde_json::from_value(Value::Object(fields)) {
        Ok(photo) => Some(photo),
        Err(e) => {
            tracing::warn!(photo = id, error = %e, "skipping photo with malformed fields");
            None
        }
    }
}

impl<C: ClockSource> Document for PhotoMap<C> {
    fn entity_id(&self) -> &str {
        self.doc.entity_id()
    }

    fn mutate(&mut self, record: &str, fields: Fields) -> Result<Vec<u8>> {
        self.update_photo_metadata(record, fields)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        self.doc.encode()
    }

    fn apply(&mut self, update: &[u8]) -> Result<usize> {
        self.doc.apply(update)
    }
}

#[cfg(test)]
#[path = "photo_tests.rs"]
mod tests;
