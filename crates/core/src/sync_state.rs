// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device sync cursor, pending conflicts and conflict policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::change::SyncChange;
use crate::error::{Error, Result};
use crate::hlc::{ClockSource, SystemClock};
use crate::store::KvStore;

/// KV namespace holding serialized [`SyncState`]s.
pub const SYNC_STATE_NAMESPACE: &str = "sync_state";

/// How conflicting client changes are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Keep the server value; the client change is dropped.
    #[default]
    ServerWins,
    /// Overwrite the server value with the client change.
    ClientWins,
    /// Hold the change until the client sends a resolution.
    Manual,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::ServerWins => "server-wins",
            ConflictPolicy::ClientWins => "client-wins",
            ConflictPolicy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "server-wins" => Ok(ConflictPolicy::ServerWins),
            "client-wins" => Ok(ConflictPolicy::ClientWins),
            "manual" => Ok(ConflictPolicy::Manual),
            _ => Err(Error::InvalidEnum {
                kind: "conflict policy",
                value: s.to_string(),
                valid: "server-wins, client-wins, manual",
            }),
        }
    }
}

/// Persisted session state of one `(user, device)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub user_id: String,
    pub device_id: String,
    /// Server time (ms) of the last successful sync step.
    pub last_sync_timestamp: i64,
    pub sync_version: u64,
    /// Changes held for a manual resolution.
    #[serde(default)]
    pub pending_changes: Vec<SyncChange>,
    #[serde(default)]
    pub conflict_resolution: ConflictPolicy,
}

impl SyncState {
    pub fn key(&self) -> String {
        state_key(&self.user_id, &self.device_id)
    }

    /// Removes and returns the pending change with this id.
    pub fn take_pending(&mut self, change_id: &str) -> Option<SyncChange> {
        let index = self.pending_changes.iter().position(|c| c.id == change_id)?;
        Some(self.pending_changes.remove(index))
    }

    /// Queues a change for manual resolution, replacing an older copy.
    pub fn hold(&mut self, change: SyncChange) {
        self.pending_changes.retain(|c| c.id != change.id);
        self.pending_changes.push(change);
    }
}

/// Store key of a device's state.
pub fn state_key(user_id: &str, device_id: &str) -> String {
    format!("{user_id}:{device_id}")
}

/// Loads and saves [`SyncState`]s through a [`KvStore`].
pub struct SyncStateManager<C: ClockSource = SystemClock> {
    store: Arc<dyn KvStore>,
    clock: C,
    default_policy: ConflictPolicy,
}

impl SyncStateManager<SystemClock> {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<C: ClockSource> SyncStateManager<C> {
    pub fn with_clock(store: Arc<dyn KvStore>, clock: C) -> Self {
        SyncStateManager { store, clock, default_policy: ConflictPolicy::default() }
    }

    /// Policy given to devices seen for the first time.
    pub fn with_default_policy(mut self, policy: ConflictPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    fn now(&self) -> i64 {
        self.clock.now_ms() as i64
    }

    /// Reads a persisted state.
    pub fn fetch(&self, user_id: &str, device_id: &str) -> Result<SyncState> {
        let key = state_key(user_id, device_id);
        let raw = self.store.get(SYNC_STATE_NAMESPACE, &key)?.ok_or(Error::SyncStateNotFound(key))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::CorruptedData(format!("sync state for {user_id}:{device_id}: {e}")))
    }

    /// Returns the persisted state, or a fresh one for a new device.
    ///
    /// A fresh state is not saved until the first [`commit`](Self::commit).
    pub fn load(&self, user_id: &str, device_id: &str) -> Result<SyncState> {
        match self.fetch(user_id, device_id) {
            Err(Error::SyncStateNotFound(key)) => {
                tracing::debug!(key, "initializing sync state");
                Ok(SyncState {
                    user_id: user_id.to_string(),
                    device_id: device_id.to_string(),
                    last_sync_timestamp: self.now(),
                    sync_version: 1,
                    pending_changes: Vec::new(),
                    conflict_resolution: self.default_policy,
                })
            }
            other => other,
        }
    }

    /// Durable upsert.
    pub fn save(&self, state: &SyncState) -> Result<()> {
        let raw = serde_json::to_string(state)?;
        self.store.set(SYNC_STATE_NAMESPACE, &state.key(), &raw)
    }

    /// Advances a state by one sync step and persists it.
    ///
    /// Returns the advanced state only once it is saved; on error the
    /// caller's state is unchanged.
    pub fn commit(&self, state: &SyncState) -> Result<SyncState> {
        let mut next = state.clone();
        next.sync_version += 1;
        next.last_sync_timestamp = self.now();
        self.save(&next)?;
        Ok(next)
    }
}

#[cfg(test)]
#[path = "sync_state_tests.rs"]
mod tests;
