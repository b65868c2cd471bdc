// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Entity-level changes pushed by clients and their classified results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// What a change does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "create",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(ChangeOperation::Create),
            "update" => Ok(ChangeOperation::Update),
            "delete" => Ok(ChangeOperation::Delete),
            _ => Err(Error::InvalidEnum {
                kind: "change operation",
                value: s.to_string(),
                valid: "create, update, delete",
            }),
        }
    }
}

/// Lifecycle of a change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    /// Not yet processed.
    #[default]
    Pending,
    /// Written to the server's state.
    Applied,
    /// Server state moved after the change's base timestamp.
    Conflict,
    /// Could not be processed; see `conflict_reason`.
    Error,
}

/// A client-side edit to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChange {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: ChangeOperation,
    /// Base timestamp (ms since epoch): the server state the client last saw.
    pub timestamp: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_reason: Option<String>,
}

impl SyncChange {
    pub fn new(
        id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: ChangeOperation,
        timestamp: i64,
        data: Value,
    ) -> Self {
        SyncChange {
            id: id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            timestamp,
            data,
            status: ChangeStatus::Pending,
            conflict_reason: None,
        }
    }

    /// Key of the entity this change targets.
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(&self.entity_type, &self.entity_id)
    }

    /// Returns the change with a new status and reason.
    pub fn with_status(mut self, status: ChangeStatus, reason: Option<String>) -> Self {
        self.status = status;
        self.conflict_reason = reason;
        self
    }

    /// Rejects changes missing the fields needed to route them.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidInput("change id must not be empty".into()));
        }
        if self.entity_type.is_empty() || self.entity_id.is_empty() {
            return Err(Error::InvalidInput(format!("change '{}' has no target entity", self.id)));
        }
        if self.operation != ChangeOperation::Delete && !self.data.is_object() {
            return Err(Error::InvalidInput(format!(
                "change '{}' ({}) requires an object in 'data'",
                self.id, self.operation
            )));
        }
        Ok(())
    }
}

/// `(entityType, entityId)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entity_type: &str, entity_id: &str) -> Self {
        EntityKey { entity_type: entity_type.to_string(), entity_id: entity_id.to_string() }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// Outcome of one change, as returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeResult {
    pub id: String,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<Value>,
}

impl ChangeResult {
    pub fn applied(id: impl Into<String>) -> Self {
        ChangeResult { id: id.into(), status: ChangeStatus::Applied, conflict_reason: None, server_data: None }
    }

    pub fn conflict(id: impl Into<String>, reason: impl Into<String>, server_data: Option<Value>) -> Self {
        ChangeResult {
            id: id.into(),
            status: ChangeStatus::Conflict,
            conflict_reason: Some(reason.into()),
            server_data,
        }
    }

    pub fn error(id: impl Into<String>, reason: impl Into<String>) -> Self {
        ChangeResult {
            id: id.into(),
            status: ChangeStatus::Error,
            conflict_reason: Some(reason.into()),
            server_data: None,
        }
    }
}

/// Entity state as known to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub entity_type: String,
    pub entity_id: String,
    pub data: Value,
    /// Server time (ms since epoch) of the last accepted write.
    pub updated_at: i64,
    pub deleted: bool,
}

/// A change as recorded in the server's change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedChange {
    /// Monotonic position in the log.
    pub seq: i64,
    /// Server time (ms since epoch) the change was accepted.
    pub server_timestamp: i64,
    /// User whose device pushed the change.
    pub user_id: String,
    pub device_id: String,
    pub change: SyncChange,
}

#[cfg(test)]
#[path = "change_tests.rs"]
mod tests;
