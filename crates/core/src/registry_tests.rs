// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_support::ManualClock;
use std::sync::Arc;
use yare::parameterized;

const POLICY: LivenessPolicy = LivenessPolicy { inactivity_timeout_ms: 1_000, grace_period_ms: 5_000 };

fn registry() -> (ConnectionRegistry<Arc<ManualClock>>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(10_000));
    (ConnectionRegistry::with_clock(POLICY, clock.clone()), clock)
}

#[parameterized(
    missing = { None },
    empty = { Some("") },
    blank = { Some("   ") },
)]
fn register_requires_user_id(user_id: Option<&str>) {
    let (mut reg, _) = registry();
    let err = reg.register("d1", user_id, DeviceType::Mobile).unwrap_err();
    assert!(matches!(err, Error::Handshake(_)));
    assert!(reg.is_empty());
}

#[test]
fn register_records_connection() {
    let (mut reg, _) = registry();
    let id = reg.register("d1", Some("u1"), DeviceType::Web).unwrap();

    let conn = reg.get(id).unwrap();
    assert_eq!(conn.user_id, "u1");
    assert_eq!(conn.device_id, "d1");
    assert_eq!(conn.device_type, DeviceType::Web);
    assert_eq!(conn.last_activity, 10_000);
    assert!(conn.is_online);
}

#[parameterized(
    mobile = { Some("mobile"), DeviceType::Mobile },
    web_upper = { Some("WEB"), DeviceType::Web },
    garbage = { Some("toaster"), DeviceType::Unknown },
    absent = { None, DeviceType::Unknown },
)]
fn device_type_from_param(value: Option<&str>, expected: DeviceType) {
    assert_eq!(DeviceType::from_param(value), expected);
}

#[test]
fn idle_connection_goes_offline_then_is_evicted() {
    let (mut reg, clock) = registry();
    let id = reg.register("d1", Some("u1"), DeviceType::Mobile).unwrap();

    clock.advance(999);
    assert!(reg.sweep().is_empty());

    clock.advance(1);
    let report = reg.sweep();
    assert_eq!(report.marked_offline, vec![id]);
    assert!(!reg.get(id).unwrap().is_online);

    clock.advance(4_999);
    assert!(reg.sweep().is_empty());

    clock.advance(1);
    assert_eq!(reg.sweep().evicted, vec![id]);
    assert!(reg.get(id).is_none());
    assert!(reg.is_empty());
}

#[test]
fn idle_session_with_open_socket_is_evicted_and_can_register_again() {
    let (mut reg, clock) = registry();
    let id = reg.register("d1", Some("u1"), DeviceType::Mobile).unwrap();
    assert_eq!(reg.get(id).unwrap().open_sockets, 1);

    clock.advance(1_000);
    reg.sweep();
    clock.advance(5_000);
    assert_eq!(reg.sweep().evicted, vec![id]);

    // The socket's next frame finds its id gone and registers afresh.
    assert!(!reg.touch(id));
    let again = reg.register("d1", Some("u1"), DeviceType::Mobile).unwrap();
    assert_ne!(again, id);
    assert!(reg.touch(again));
    assert_eq!(reg.online_count(), 1);
    assert!(!reg.disconnect(id));
    assert!(reg.disconnect(again));
    assert_eq!(reg.online_count(), 0);
}

#[test]
fn device_type_parse_is_strict() {
    assert_eq!("web".parse::<DeviceType>().unwrap(), DeviceType::Web);
    assert!("Web".parse::<DeviceType>().is_err());
}

#[test]
fn touch_keeps_connection_alive() {
    let (mut reg, clock) = registry();
    let id = reg.register("d1", Some("u1"), DeviceType::Mobile).unwrap();

    for _ in 0..5 {
        clock.advance(800);
        assert!(reg.touch(id));
        assert!(reg.sweep().is_empty());
    }
    assert_eq!(reg.online_count(), 1);
}

#[test]
fn reconnect_within_grace_resumes_same_id() {
    let (mut reg, clock) = registry();
    let id = reg.register("d1", Some("u1"), DeviceType::Mobile).unwrap();
    reg.disconnect(id);
    assert!(!reg.get(id).unwrap().is_online);

    clock.advance(3_000);
    let again = reg.register("d1", Some("u1"), DeviceType::Mobile).unwrap();
    assert_eq!(again, id);
    assert!(reg.get(id).unwrap().is_online);

    clock.advance(3_000);
    assert!(reg.sweep().evicted.is_empty());
}

#[test]
fn second_socket_keeps_session_online() {
    let (mut reg, _) = registry();
    let first = reg.register("d1", Some("u1"), DeviceType::Web).unwrap();
    let second = reg.register("d1", Some("u1"), DeviceType::Web).unwrap();
    assert_eq!(first, second);

    reg.disconnect(first);
    assert!(reg.get(first).unwrap().is_online);
    reg.disconnect(second);
    assert!(!reg.get(first).unwrap().is_online);
}

#[test]
fn evicted_slot_is_reused_with_new_generation() {
    let (mut reg, clock) = registry();
    let old = reg.register("d1", Some("u1"), DeviceType::Mobile).unwrap();
    reg.disconnect(old);
    clock.advance(5_000);
    reg.sweep();

    let new = reg.register("d2", Some("u2"), DeviceType::Web).unwrap();
    assert_ne!(old, new);
    assert!(reg.get(old).is_none());
    assert!(!reg.touch(old));
    assert_eq!(reg.get(new).unwrap().device_id, "d2");
    assert_eq!(reg.len(), 1);
}

#[test]
fn different_users_same_device_are_separate() {
    let (mut reg, _) = registry();
    let a = reg.register("shared", Some("u1"), DeviceType::Web).unwrap();
    let b = reg.register("shared", Some("u2"), DeviceType::Web).unwrap();
    assert_ne!(a, b);
    assert_eq!(reg.len(), 2);
}

#[test]
fn connection_id_serializes_as_string() {
    let (mut reg, _) = registry();
    let id = reg.register("d1", Some("u1"), DeviceType::Web).unwrap();
    assert_eq!(serde_json::to_value(id).unwrap(), serde_json::json!(id.to_string()));
}
