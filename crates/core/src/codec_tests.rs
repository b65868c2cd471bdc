// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use serde_json::json;
use yare::parameterized;

fn sample() -> Update {
    Update {
        entity_id: "report:r1".into(),
        entries: vec![
            Entry { record: "photo1".into(), field: None, stamp: Hlc::new(10, 0, 1), value: json!(true) },
            Entry {
                record: "photo1".into(),
                field: Some("caption".into()),
                stamp: Hlc::new(12, 3, 1),
                value: json!("front elevation"),
            },
        ],
    }
}

#[test]
fn encode_starts_with_header() {
    let bytes = sample().encode().unwrap();
    assert_eq!(&bytes[..4], b"FSU\x01");
}

#[test]
fn decode_returns_original_update() {
    let update = sample();
    let decoded = Update::decode(&update.encode().unwrap()).unwrap();
    assert_eq!(decoded, update);
}

#[test]
fn presence_entries_omit_field() {
    let bytes = sample().encode().unwrap();
    let body = std::str::from_utf8(&bytes[4..]).unwrap();
    assert_eq!(body.matches("\"field\"").count(), 1);
}

#[parameterized(
    empty = { b"".to_vec() },
    short = { b"FS".to_vec() },
    wrong_magic = { b"XYZ\x01{}".to_vec() },
    future_version = { b"FSU\x09{}".to_vec() },
    truncated_body = { b"FSU\x01{\"entity_id\":".to_vec() },
)]
fn decode_rejects_garbage(bytes: Vec<u8>) {
    assert!(matches!(Update::decode(&bytes), Err(Error::Merge(_))));
}

#[test]
fn max_stamp_picks_newest_entry() {
    assert_eq!(sample().max_stamp(), Some(Hlc::new(12, 3, 1)));
    assert_eq!(Update::new("x").max_stamp(), None);
}

#[test]
fn base64_transport() {
    let bytes = sample().encode().unwrap();
    let text = to_base64(&bytes);
    assert_eq!(from_base64(&text).unwrap(), bytes);
    assert!(matches!(from_base64("%%%"), Err(Error::Decode(_))));
}
