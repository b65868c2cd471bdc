// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_support::ManualClock;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn fields(pairs: &[(&str, Value)]) -> Fields {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn doc_at(entity: &str, ms: u64) -> (SyncableDocument<Arc<ManualClock>>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(ms));
    (SyncableDocument::with_clock(entity, clock.clone()), clock)
}

#[test]
fn replica_id_comes_from_entity() {
    let a = SyncableDocument::new("parcel:P1");
    let b = SyncableDocument::new("parcel:P1");
    assert_eq!(a.replica_id(), b.replica_id());
    assert_eq!(a.replica_id(), replica_id_for("parcel:P1"));
}

#[test]
fn write_then_read_fields() {
    let (mut doc, _) = doc_at("e1", 1000);
    doc.write_fields("r1", fields(&[("caption", json!("north wall")), ("lat", json!(45.1))]));

    let read = doc.fields("r1").unwrap();
    assert_eq!(read["caption"], json!("north wall"));
    assert_eq!(read["lat"], json!(45.1));
    assert!(doc.fields("missing").is_none());
}

#[test]
fn later_write_wins_regardless_of_arrival_order() {
    let (mut a, clock_a) = doc_at("e1", 1000);
    let (mut b, _) = doc_at("e1", 500);

    let early = b.write_fields("r", fields(&[("text", json!("early"))]));
    clock_a.set(2000);
    let late = a.write_fields("r", fields(&[("text", json!("late"))]));

    let (mut c, _) = doc_at("e1", 0);
    c.apply_update(&late).unwrap();
    c.apply_update(&early).unwrap();
    assert_eq!(c.fields("r").unwrap()["text"], json!("late"));

    b.apply_update(&late).unwrap();
    a.apply_update(&early).unwrap();
    assert_eq!(a, b);
}

#[test]
fn equal_stamps_resolve_on_value() {
    // Same entity, same wall time: both replicas mint the identical stamp.
    let (mut a, _) = doc_at("parcel:P1", 1000);
    let (mut b, _) = doc_at("parcel:P1", 1000);

    let ua = a.write_fields("note", fields(&[("text", json!("Update from device 1"))]));
    let ub = b.write_fields("note", fields(&[("text", json!("Update from device 2"))]));
    assert_eq!(ua.entries[0].stamp, ub.entries[0].stamp);

    a.apply_update(&ub).unwrap();
    b.apply_update(&ua).unwrap();
    assert_eq!(a, b);
    let text = a.fields("note").unwrap()["text"].clone();
    assert!(text == json!("Update from device 1") || text == json!("Update from device 2"));
}

#[test]
fn apply_twice_changes_nothing_second_time() {
    let (mut a, _) = doc_at("e1", 1000);
    let bytes = a.mutate("r", fields(&[("x", json!(1)), ("y", json!(2))])).unwrap();

    let (mut b, _) = doc_at("e1", 0);
    assert_eq!(b.apply(&bytes).unwrap(), 2);
    assert_eq!(b.apply(&bytes).unwrap(), 0);
    assert_eq!(a, b);
}

#[test]
fn apply_rejects_other_entity() {
    let (mut a, _) = doc_at("e1", 1000);
    let (mut b, _) = doc_at("e2", 1000);
    let bytes = b.mutate("r", fields(&[("x", json!(1))])).unwrap();
    assert!(matches!(a.apply(&bytes), Err(Error::Merge(_))));
}

#[test]
fn apply_rejects_garbage() {
    let (mut a, _) = doc_at("e1", 1000);
    assert!(matches!(a.apply(b"not an update"), Err(Error::Merge(_))));
}

#[test]
fn presence_add_remove_readd() {
    let (mut doc, clock) = doc_at("e1", 1000);
    doc.set_presence("r", true);
    doc.write_fields("r", fields(&[("caption", json!("kept"))]));
    assert!(doc.is_present("r"));

    clock.advance(1);
    doc.set_presence("r", false);
    assert!(!doc.is_present("r"));
    assert_eq!(doc.present_records().count(), 0);

    clock.advance(1);
    doc.set_presence("r", true);
    let (id, read) = doc.present_records().next().unwrap();
    assert_eq!(id, "r");
    assert_eq!(read["caption"], json!("kept"));
}

#[test]
fn local_write_after_merge_beats_remote_future_stamp() {
    let (mut a, _) = doc_at("e1", 1000);
    let (mut b, _) = doc_at("e1", 9000);

    let remote = b.write_fields("r", fields(&[("x", json!("remote"))]));
    a.apply_update(&remote).unwrap();
    a.write_fields("r", fields(&[("x", json!("local"))]));

    assert_eq!(a.fields("r").unwrap()["x"], json!("local"));
}

#[test]
fn remote_stamp_with_saturated_counter_still_loses_to_later_local_write() {
    let (mut doc, _) = doc_at("e1", 1000);
    let remote = Update {
        entity_id: "e1".into(),
        entries: vec![Entry {
            record: "r".into(),
            field: Some("text".into()),
            stamp: Hlc::new(1000, u32::MAX, 7),
            value: json!("remote"),
        }],
    };
    assert_eq!(doc.apply_update(&remote).unwrap(), 1);

    doc.write_fields("r", fields(&[("text", json!("local"))]));
    assert_eq!(doc.fields("r").unwrap()["text"], json!("local"));
}

#[test]
fn delta_since_only_includes_newer_registers() {
    let (mut doc, clock) = doc_at("e1", 1000);
    doc.write_fields("r", fields(&[("a", json!(1))]));
    let cursor = doc.high_water();

    clock.advance(10);
    doc.write_fields("r", fields(&[("b", json!(2))]));

    let delta = doc.delta_since(&cursor);
    assert_eq!(delta.entries.len(), 1);
    assert_eq!(delta.entries[0].field.as_deref(), Some("b"));
    assert_eq!(doc.snapshot().entries.len(), 2);

    let bytes = doc.encode_since(&cursor).unwrap();
    assert_eq!(Update::decode(&bytes).unwrap(), delta);
}

#[test]
fn high_water_of_empty_document_is_min() {
    let (doc, _) = doc_at("e1", 1000);
    assert_eq!(doc.high_water(), Hlc::min());
}

#[derive(Debug, Clone)]
enum Edit {
    Write { record: u8, field: u8, value: u8 },
    Presence { record: u8, present: bool },
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0u8..3, 0u8..3, 0u8..5).prop_map(|(record, field, value)| Edit::Write { record, field, value }),
        (0u8..3, any::<bool>()).prop_map(|(record, present)| Edit::Presence { record, present }),
    ]
}

/// Runs edits on a fresh replica, advancing its clock by `steps`.
fn replay(start_ms: u64, edits: &[(Edit, u8)]) -> (SyncableDocument<Arc<ManualClock>>, Vec<Vec<u8>>) {
    let (mut doc, clock) = doc_at("parcel:prop", start_ms);
    let mut updates = Vec::new();
    for (edit, step) in edits {
        clock.advance(u64::from(*step));
        let update = match edit {
            Edit::Write { record, field, value } => doc.write_fields(
                &format!("r{record}"),
                fields(&[(format!("f{field}").as_str(), json!(value))]),
            ),
            Edit::Presence { record, present } => doc.set_presence(&format!("r{record}"), *present),
        };
        updates.push(update.encode().unwrap());
    }
    (doc, updates)
}

proptest! {
    #[test]
    fn prop_replicas_converge(
        a_edits in prop::collection::vec((edit(), 0u8..3), 0..12),
        b_edits in prop::collection::vec((edit(), 0u8..3), 0..12),
        a_start in 1000u64..1005,
        b_start in 1000u64..1005,
    ) {
        let (mut a, _) = replay(a_start, &a_edits);
        let (mut b, _) = replay(b_start, &b_edits);
        let a_state = a.encode().unwrap();
        let b_state = b.encode().unwrap();

        a.apply(&b_state).unwrap();
        b.apply(&a_state).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_update_order_does_not_matter(
        a_edits in prop::collection::vec((edit(), 0u8..3), 1..10),
        b_edits in prop::collection::vec((edit(), 0u8..3), 1..10),
        seed in any::<u64>(),
    ) {
        let (_, a_updates) = replay(1000, &a_edits);
        let (_, b_updates) = replay(1000, &b_edits);

        let mut all: Vec<Vec<u8>> = a_updates.into_iter().chain(b_updates).collect();
        let (mut forward, _) = doc_at("parcel:prop", 0);
        for u in &all {
            forward.apply(u).unwrap();
        }

        // Deterministic shuffle from the seed.
        let mut state = seed | 1;
        for i in (1..all.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            all.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let (mut shuffled, _) = doc_at("parcel:prop", 0);
        for u in &all {
            shuffled.apply(u).unwrap();
        }

        prop_assert_eq!(forward, shuffled);
    }

    #[test]
    fn prop_apply_is_idempotent(
        edits in prop::collection::vec((edit(), 0u8..3), 1..12),
    ) {
        let (source, _) = replay(1000, &edits);
        let state = source.encode().unwrap();

        let (mut once, _) = doc_at("parcel:prop", 0);
        once.apply(&state).unwrap();
        let (mut twice, _) = doc_at("parcel:prop", 0);
        twice.apply(&state).unwrap();
        prop_assert_eq!(twice.apply(&state).unwrap(), 0);

        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(&once, &source);
    }
}
