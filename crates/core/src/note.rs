// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Parcel notes: one free-text note per parcel, replicated as a document.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::doc::{Document, Fields, SyncableDocument};
use crate::error::{Error, Result};
use crate::hlc::{ClockSource, SystemClock};

/// Record key holding the note inside its document.
const NOTE_RECORD: &str = "note";

/// Materialized view of a parcel note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelNote {
    pub parcel_id: String,
    pub text: String,
    /// Milliseconds since Unix epoch of the winning write.
    pub last_updated: i64,
    pub version: u64,
}

/// Document id for a parcel's note.
pub fn note_entity_id(parcel_id: &str) -> String {
    format!("parcel:{parcel_id}")
}

/// Replicated note for one parcel.
pub struct ParcelNoteDoc<C: ClockSource = SystemClock> {
    parcel_id: String,
    doc: SyncableDocument<C>,
}

impl ParcelNoteDoc<SystemClock> {
    pub fn new(parcel_id: impl Into<String>) -> Self {
        Self::with_clock(parcel_id, SystemClock)
    }
}

impl<C: ClockSource> ParcelNoteDoc<C> {
    pub fn with_clock(parcel_id: impl Into<String>, clock: C) -> Self {
        let parcel_id = parcel_id.into();
        let doc = SyncableDocument::with_clock(note_entity_id(&parcel_id), clock);
        ParcelNoteDoc { parcel_id, doc }
    }

    pub fn parcel_id(&self) -> &str {
        &self.parcel_id
    }

    /// Replaces the note text, bumping `version` and `lastUpdated`.
    ///
    /// Returns the encoded delta for this edit.
    pub fn set_text(&mut self, text: &str) -> Result<Vec<u8>> {
        let version = self.note().map_or(0, |n| n.version) + 1;
        let mut fields = Fields::new();
        fields.insert("text".into(), json!(text));
        fields.insert("lastUpdated".into(), json!(self.doc.now_ms()));
        fields.insert("version".into(), json!(version));
        self.doc.write_fields(NOTE_RECORD, fields).encode()
    }

    /// Current note, or `None` before the first edit.
    pub fn note(&self) -> Option<ParcelNote> {
        let fields = self.doc.fields(NOTE_RECORD)?;
        Some(ParcelNote {
            parcel_id: self.parcel_id.clone(),
            text: fields.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
            last_updated: fields.get("lastUpdated").and_then(Value::as_i64).unwrap_or(0),
            version: fields.get("version").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    /// Note text, empty before the first edit.
    pub fn text(&self) -> String {
        self.note().map(|n| n.text).unwrap_or_default()
    }

    pub fn document(&self) -> &SyncableDocument<C> {
        &self.doc
    }
}

impl<C: ClockSource> Document for ParcelNoteDoc<C> {
    fn entity_id(&self) -> &str {
        self.doc.entity_id()
    }

    /// Accepts `{"text": "..."}` for the note record.
    fn mutate(&mut self, record: &str, fields: Fields) -> Result<Vec<u8>> {
        if record != NOTE_RECORD {
            return Err(Error::InvalidInput(format!("parcel notes have no record '{record}'")));
        }
        let text = fields
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("parcel note edits require a string 'text'".into()))?;
        self.set_text(text)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        self.doc.encode()
    }

    fn apply(&mut self, update: &[u8]) -> Result<usize> {
        self.doc.apply(update)
    }
}

#[cfg(test)]
#[path = "note_tests.rs"]
mod tests;
