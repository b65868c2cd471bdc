// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Convergent documents: a map of records, each a map of last-writer-wins
//! registers.
//!
//! Merge rules:
//! - Every field of every record is an independent register
//! - A register keeps the write with the highest HLC stamp
//! - Equal stamps are broken by the SHA-256 of the written value
//! - Each record also has a presence register (added / removed), merged the
//!   same way; field registers survive removal so a later re-add sees them
//!
//! Register merge is a max over a total order, so applying updates is
//! idempotent, commutative and associative.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::codec::{Entry, Update};
use crate::error::{Error, Result};
use crate::hlc::{replica_id_for, ClockSource, Hlc, HlcClock, SystemClock};

/// Field name to JSON value, as written by one local mutation.
pub type Fields = Map<String, Value>;

/// The narrow interface the sync engine needs from any document type.
pub trait Document {
    /// Entity this document replicates.
    fn entity_id(&self) -> &str;

    /// Records a local edit and returns it as an encoded delta.
    fn mutate(&mut self, record: &str, fields: Fields) -> Result<Vec<u8>>;

    /// Encodes the full state.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Merges an encoded delta or full state, returning how many registers
    /// changed. Safe to call repeatedly and in any order.
    fn apply(&mut self, update: &[u8]) -> Result<usize>;
}

#[derive(Debug, Clone, PartialEq)]
struct Register {
    stamp: Hlc,
    value: Value,
}

impl Register {
    fn supersedes(&self, other: &Register) -> bool {
        match self.stamp.cmp(&other.stamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => value_digest(&self.value) > value_digest(&other.value),
        }
    }
}

fn value_digest(value: &Value) -> [u8; 32] {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    Sha256::digest(&bytes).into()
}

/// Writes `incoming` into `slot` if it wins. Returns true on change.
fn merge_register(slot: &mut Option<Register>, incoming: Register) -> bool {
    match slot {
        Some(current) if !incoming.supersedes(current) => false,
        _ => {
            *slot = Some(incoming);
            true
        }
    }
}

fn merge_field(fields: &mut BTreeMap<String, Register>, field: &str, incoming: Register) -> bool {
    match fields.get_mut(field) {
        Some(current) if !incoming.supersedes(current) => false,
        Some(current) => {
            *current = incoming;
            true
        }
        None => {
            fields.insert(field.to_string(), incoming);
            true
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Record {
    presence: Option<Register>,
    fields: BTreeMap<String, Register>,
}

impl Record {
    fn is_present(&self) -> bool {
        matches!(&self.presence, Some(Register { value: Value::Bool(true), .. }))
    }

    fn materialize(&self) -> Fields {
        self.fields.iter().map(|(k, r)| (k.clone(), r.value.clone())).collect()
    }
}

/// A replicated document for one entity.
pub struct SyncableDocument<C: ClockSource = SystemClock> {
    entity_id: String,
    clock: HlcClock<C>,
    records: BTreeMap<String, Record>,
}

impl SyncableDocument<SystemClock> {
    /// Creates an empty document whose replica id is derived from `entity_id`.
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self::with_clock(entity_id, SystemClock)
    }
}

impl<C: ClockSource> SyncableDocument<C> {
    pub fn with_clock(entity_id: impl Into<String>, clock: C) -> Self {
        let entity_id = entity_id.into();
        let replica_id = replica_id_for(&entity_id);
        SyncableDocument { clock: HlcClock::with_clock(clock, replica_id), entity_id, records: BTreeMap::new() }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn replica_id(&self) -> u32 {
        self.clock.replica_id()
    }

    /// Wall time of the document's clock source, in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.wall_ms()
    }

    /// Writes fields of a record under one fresh stamp.
    pub fn write_fields(&mut self, record: &str, fields: Fields) -> Update {
        let stamp = self.clock.tick();
        let mut update = Update::new(self.entity_id.clone());
        let slot = self.records.entry(record.to_string()).or_default();
        for (field, value) in fields {
            merge_field(&mut slot.fields, &field, Register { stamp, value: value.clone() });
            update.entries.push(Entry { record: record.to_string(), field: Some(field), stamp, value });
        }
        update
    }

    /// Marks a record as added (`true`) or removed (`false`).
    pub fn set_presence(&mut self, record: &str, present: bool) -> Update {
        let stamp = self.clock.tick();
        let value = Value::Bool(present);
        let slot = self.records.entry(record.to_string()).or_default();
        merge_register(&mut slot.presence, Register { stamp, value: value.clone() });

        let mut update = Update::new(self.entity_id.clone());
        update.entries.push(Entry { record: record.to_string(), field: None, stamp, value });
        update
    }

    /// Merges a decoded update.
    pub fn apply_update(&mut self, update: &Update) -> Result<usize> {
        if update.entity_id != self.entity_id {
            return Err(Error::Merge(format!(
                "update for '{}' applied to document '{}'",
                update.entity_id, self.entity_id
            )));
        }

        let mut changed = 0;
        for entry in &update.entries {
            self.clock.observe(&entry.stamp);
            let register = Register { stamp: entry.stamp, value: entry.value.clone() };
            let slot = self.records.entry(entry.record.clone()).or_default();
            let won = match &entry.field {
                None => merge_register(&mut slot.presence, register),
                Some(field) => merge_field(&mut slot.fields, field, register),
            };
            if won {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// All registers as a single update.
    pub fn snapshot(&self) -> Update {
        self.entries_since(&Hlc::min(), true)
    }

    /// Registers written after `since`.
    pub fn delta_since(&self, since: &Hlc) -> Update {
        self.entries_since(since, false)
    }

    fn entries_since(&self, since: &Hlc, inclusive: bool) -> Update {
        let keep = |stamp: &Hlc| inclusive || stamp.is_after(since);
        let mut update = Update::new(self.entity_id.clone());
        for (id, record) in &self.records {
            if let Some(p) = record.presence.as_ref().filter(|p| keep(&p.stamp)) {
                update.entries.push(Entry { record: id.clone(), field: None, stamp: p.stamp, value: p.value.clone() });
            }
            for (field, r) in record.fields.iter().filter(|(_, r)| keep(&r.stamp)) {
                update.entries.push(Entry {
                    record: id.clone(),
                    field: Some(field.clone()),
                    stamp: r.stamp,
                    value: r.value.clone(),
                });
            }
        }
        update
    }

    /// Encodes only the registers written after `since`.
    pub fn encode_since(&self, since: &Hlc) -> Result<Vec<u8>> {
        self.delta_since(since).encode()
    }

    /// Newest stamp held by any register; usable as a sync cursor.
    pub fn high_water(&self) -> Hlc {
        self.records
            .values()
            .flat_map(|r| r.presence.iter().chain(r.fields.values()))
            .map(|r| r.stamp)
            .max()
            .unwrap_or_else(Hlc::min)
    }

    /// True if the record is currently added.
    pub fn is_present(&self, record: &str) -> bool {
        self.records.get(record).is_some_and(Record::is_present)
    }

    /// Field values of a record, regardless of presence.
    pub fn fields(&self, record: &str) -> Option<Fields> {
        self.records.get(record).map(Record::materialize)
    }

    /// Ids of records currently added, in key order.
    pub fn present_records(&self) -> impl Iterator<Item = (&str, Fields)> + '_ {
        self.records.iter().filter(|(_, r)| r.is_present()).map(|(id, r)| (id.as_str(), r.materialize()))
    }
}

/// Documents compare by replicated state only; clocks are local.
impl<C: ClockSource, D: ClockSource> PartialEq<SyncableDocument<D>> for SyncableDocument<C> {
    fn eq(&self, other: &SyncableDocument<D>) -> bool {
        self.entity_id == other.entity_id && self.records == other.records
    }
}

impl<C: ClockSource> std::fmt::Debug for SyncableDocument<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncableDocument")
            .field("entity_id", &self.entity_id)
            .field("replica_id", &self.replica_id())
            .field("records", &self.records.len())
            .finish()
    }
}

impl<C: ClockSource> Document for SyncableDocument<C> {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn mutate(&mut self, record: &str, fields: Fields) -> Result<Vec<u8>> {
        self.write_fields(record, fields).encode()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        self.snapshot().encode()
    }

    fn apply(&mut self, update: &[u8]) -> Result<usize> {
        let update = Update::decode(update)?;
        self.apply_update(&update)
    }
}

#[cfg(test)]
#[path = "doc_tests.rs"]
mod tests;
