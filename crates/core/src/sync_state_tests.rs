// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::change::ChangeOperation;
use crate::store::MemoryStore;
use crate::test_support::ManualClock;
use serde_json::json;
use yare::parameterized;

fn manager(store: Arc<MemoryStore>) -> SyncStateManager<Arc<ManualClock>> {
    SyncStateManager::with_clock(store, Arc::new(ManualClock::new(5_000)))
}

#[test]
fn load_initializes_new_device() {
    let store = Arc::new(MemoryStore::new());
    let state = manager(store.clone()).load("u1", "d1").unwrap();

    assert_eq!(state.sync_version, 1);
    assert_eq!(state.last_sync_timestamp, 5_000);
    assert!(state.pending_changes.is_empty());
    assert_eq!(state.conflict_resolution, ConflictPolicy::ServerWins);
    assert!(store.get(SYNC_STATE_NAMESPACE, "u1:d1").unwrap().is_none());
}

#[test]
fn fetch_missing_is_not_found() {
    let err = manager(Arc::new(MemoryStore::new())).fetch("u1", "d1").unwrap_err();
    assert!(matches!(err, Error::SyncStateNotFound(key) if key == "u1:d1"));
}

#[test]
fn default_policy_is_configurable() {
    let manager = manager(Arc::new(MemoryStore::new())).with_default_policy(ConflictPolicy::Manual);
    assert_eq!(manager.load("u", "d").unwrap().conflict_resolution, ConflictPolicy::Manual);
}

#[test]
fn commit_bumps_version_once_and_persists() {
    let manager = manager(Arc::new(MemoryStore::new()));
    let state = manager.load("u1", "d1").unwrap();

    let next = manager.commit(&state).unwrap();
    assert_eq!(next.sync_version, 2);
    assert_eq!(state.sync_version, 1);
    assert_eq!(manager.load("u1", "d1").unwrap(), next);

    let after = manager.commit(&next).unwrap();
    assert_eq!(after.sync_version, 3);
}

#[test]
fn commit_fails_without_advancing_when_store_is_down() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(store.clone());
    let state = manager.load("u1", "d1").unwrap();
    let saved = manager.commit(&state).unwrap();

    store.set_available(false);
    let err = manager.commit(&saved).unwrap_err();
    assert!(err.is_store_unavailable());

    store.set_available(true);
    assert_eq!(manager.fetch("u1", "d1").unwrap().sync_version, 2);
}

#[test]
fn corrupted_state_is_reported() {
    let store = Arc::new(MemoryStore::new());
    store.set(SYNC_STATE_NAMESPACE, "u1:d1", "not json").unwrap();
    assert!(matches!(manager(store).load("u1", "d1"), Err(Error::CorruptedData(_))));
}

#[test]
fn pending_changes_survive_reload() {
    let manager = manager(Arc::new(MemoryStore::new()));
    let mut state = manager.load("u1", "d1").unwrap();
    state.hold(SyncChange::new("c1", "photo", "p1", ChangeOperation::Update, 1, json!({"caption": "a"})));
    state.hold(SyncChange::new("c1", "photo", "p1", ChangeOperation::Update, 2, json!({"caption": "b"})));
    manager.save(&state).unwrap();

    let mut loaded = manager.load("u1", "d1").unwrap();
    assert_eq!(loaded.pending_changes.len(), 1);
    assert_eq!(loaded.take_pending("c1").unwrap().timestamp, 2);
    assert!(loaded.take_pending("c1").is_none());
}

#[parameterized(
    server_wins = { "server-wins", ConflictPolicy::ServerWins },
    client_wins = { "client-wins", ConflictPolicy::ClientWins },
    manual = { "manual", ConflictPolicy::Manual },
)]
fn policy_from_str(input: &str, expected: ConflictPolicy) {
    assert_eq!(input.parse::<ConflictPolicy>().unwrap(), expected);
    assert_eq!(serde_json::to_value(expected).unwrap(), json!(input));
}

#[test]
fn state_json_is_camel_case() {
    let state = manager(Arc::new(MemoryStore::new())).load("u1", "d1").unwrap();
    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(value["syncVersion"], json!(1));
    assert_eq!(value["conflictResolution"], json!("server-wins"));
}
