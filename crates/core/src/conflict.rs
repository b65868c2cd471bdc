// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Conflict detection and resolution for entity-level changes.
//!
//! A change conflicts when the server's copy of its entity was written after
//! the change's base timestamp. Conflicts are results, not errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::change::{ChangeOperation, ChangeResult, ChangeStatus, EntityRecord, SyncChange};
use crate::error::{Error, Result};
use crate::store::{ChangeSource, EntityStore};
use crate::sync_state::{ConflictPolicy, SyncState};

/// Which side a manual resolution keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionChoice {
    /// Apply the held client change.
    Client,
    /// Drop the held client change.
    Server,
    /// Apply the held change with the `data` supplied in the resolution.
    Custom,
}

/// One entry of a `conflict_resolution` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub change_id: String,
    pub resolution: ResolutionChoice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Result of checking a change against the server's copy.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// Safe to apply over `current`.
    Clean { current: Option<EntityRecord> },
    /// The server copy moved after the change's base timestamp.
    Conflict { server: EntityRecord },
}

/// Checks whether `change` was made against a stale server copy.
pub fn detect<S: EntityStore + ?Sized>(store: &S, change: &SyncChange) -> Result<Detection> {
    let current = store.get_entity(&change.entity_key())?;
    match current {
        Some(server) if server.updated_at > change.timestamp => Ok(Detection::Conflict { server }),
        current => Ok(Detection::Clean { current }),
    }
}

fn conflict_reason(server: &EntityRecord, change: &SyncChange) -> String {
    format!(
        "{} modified on server at {} after base timestamp {}",
        change.entity_key(),
        server.updated_at,
        change.timestamp
    )
}

/// Server-visible data of an entity; `null` once deleted.
fn visible_data(record: &EntityRecord) -> Value {
    if record.deleted {
        Value::Null
    } else {
        record.data.clone()
    }
}

/// Outcome of a batch of changes or resolutions.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// One result per input, in input order.
    pub results: Vec<ChangeResult>,
    /// Changes written to the entity store, with their merged data.
    pub applied: Vec<SyncChange>,
}

/// Classifies and applies changes for one device.
pub struct ConflictResolver<'a, S: EntityStore + ChangeSource + ?Sized> {
    store: &'a S,
    user_id: &'a str,
    device_id: &'a str,
    now_ms: i64,
}

impl<'a, S: EntityStore + ChangeSource + ?Sized> ConflictResolver<'a, S> {
    pub fn new(store: &'a S, user_id: &'a str, device_id: &'a str, now_ms: i64) -> Self {
        ConflictResolver { store, user_id, device_id, now_ms }
    }

    /// Writes a change over `current` and appends it to the change log.
    ///
    /// Updates merge into the existing object; deletes keep the last data.
    fn apply(&self, change: &SyncChange, current: Option<EntityRecord>) -> Result<SyncChange> {
        let previous = current.filter(|r| !r.deleted).map(|r| r.data);
        let (data, deleted) = match change.operation {
            ChangeOperation::Create => (change.data.clone(), false),
            ChangeOperation::Update => match (previous, &change.data) {
                (Some(Value::Object(mut base)), Value::Object(patch)) => {
                    base.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
                    (Value::Object(base), false)
                }
                _ => (change.data.clone(), false),
            },
            ChangeOperation::Delete => (previous.unwrap_or(Value::Null), true),
        };

        let mut record = EntityRecord {
            entity_type: change.entity_type.clone(),
            entity_id: change.entity_id.clone(),
            data: data.clone(),
            updated_at: self.now_ms,
            deleted,
        };
        self.store.put_entity(&record)?;

        let mut applied = change.clone().with_status(ChangeStatus::Applied, None);
        applied.data = data;
        let logged_at = self.store.append_change(self.now_ms, self.user_id, self.device_id, &applied)?;
        // Keep the entity stamp equal to its log position.
        if logged_at != record.updated_at {
            record.updated_at = logged_at;
            self.store.put_entity(&record)?;
        }
        Ok(applied)
    }

    /// Classifies one change under `policy`.
    ///
    /// Returns the result, the applied change (if any) and the change to hold
    /// for manual resolution (if any).
    pub fn resolve(
        &self,
        change: SyncChange,
        policy: ConflictPolicy,
    ) -> Result<(ChangeResult, Option<SyncChange>, Option<SyncChange>)> {
        if let Err(e) = change.validate() {
            return Ok((ChangeResult::error(&change.id, e.to_string()), None, None));
        }

        match detect(self.store, &change)? {
            Detection::Clean { current } => {
                let applied = self.apply(&change, current)?;
                Ok((ChangeResult::applied(&change.id), Some(applied), None))
            }
            Detection::Conflict { server } => {
                let reason = conflict_reason(&server, &change);
                match policy {
                    ConflictPolicy::ServerWins => {
                        tracing::debug!(change = %change.id, %reason, "discarding client change");
                        let result = ChangeResult::conflict(&change.id, reason, Some(visible_data(&server)));
                        Ok((result, None, None))
                    }
                    ConflictPolicy::ClientWins => {
                        let applied = self.apply(&change, Some(server))?;
                        let mut result = ChangeResult::applied(&change.id);
                        result.conflict_reason = Some(format!("{reason}; client value kept"));
                        Ok((result, Some(applied), None))
                    }
                    ConflictPolicy::Manual => {
                        let result = ChangeResult::conflict(
                            &change.id,
                            format!("{reason}; awaiting resolution"),
                            Some(visible_data(&server)),
                        );
                        let held = change.with_status(ChangeStatus::Conflict, result.conflict_reason.clone());
                        Ok((result, None, Some(held)))
                    }
                }
            }
        }
    }

    /// Runs a `sync_update` batch against `state`, holding manual conflicts
    /// in its pending queue.
    pub fn process_changes(&self, state: &mut SyncState, changes: Vec<SyncChange>) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for change in changes {
            let (result, applied, held) = self.resolve(change, state.conflict_resolution)?;
            outcome.results.push(result);
            outcome.applied.extend(applied);
            if let Some(held) = held {
                state.hold(held);
            }
        }
        Ok(outcome)
    }

    /// Settles held conflicts. Unknown change ids yield error results.
    pub fn process_resolutions(
        &self,
        state: &mut SyncState,
        resolutions: Vec<Resolution>,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for resolution in resolutions {
            let Some(pending) = state.take_pending(&resolution.change_id) else {
                let message = Error::RecordNotFound(format!("pending change '{}'", resolution.change_id));
                outcome.results.push(ChangeResult::error(&resolution.change_id, message.to_string()));
                continue;
            };

            match self.settle(pending, &resolution) {
                Ok((result, applied)) => {
                    outcome.results.push(result);
                    outcome.applied.extend(applied);
                }
                Err(e @ Error::InvalidInput(_)) => {
                    outcome.results.push(ChangeResult::error(&resolution.change_id, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    fn settle(&self, pending: SyncChange, resolution: &Resolution) -> Result<(ChangeResult, Option<SyncChange>)> {
        let current = self.store.get_entity(&pending.entity_key())?;
        match resolution.resolution {
            ResolutionChoice::Server => {
                let server_data = current.as_ref().map(visible_data);
                let result = ChangeResult::conflict(&pending.id, "resolved: server value kept", server_data);
                Ok((result, None))
            }
            ResolutionChoice::Client => {
                let applied = self.apply(&pending, current)?;
                Ok((ChangeResult::applied(&pending.id), Some(applied)))
            }
            ResolutionChoice::Custom => {
                let data = resolution.data.clone().filter(Value::is_object).ok_or_else(|| {
                    Error::InvalidInput(format!("custom resolution of '{}' requires object data", pending.id))
                })?;
                let mut change = pending;
                change.data = data;
                if change.operation == ChangeOperation::Delete {
                    change.operation = ChangeOperation::Update;
                }
                // Custom data replaces the server copy wholesale.
                let applied = self.apply(&change, None)?;
                Ok((ChangeResult::applied(&change.id), Some(applied)))
            }
        }
    }
}

#[cfg(test)]
#[path = "conflict_tests.rs"]
mod tests;
