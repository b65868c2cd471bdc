// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_support::ManualClock;

#[test]
fn hlc_ordering() {
    assert!(Hlc::new(200, 0, 0) > Hlc::new(100, 0, 0));
    assert!(Hlc::new(100, 2, 0) > Hlc::new(100, 1, 0));
    assert!(Hlc::new(100, 1, 2) > Hlc::new(100, 1, 1));
}

#[test]
fn hlc_min_sorts_first() {
    assert!(Hlc::new(1, 0, 0).is_after(&Hlc::min()));
}

#[test]
fn replica_id_is_stable_per_entity() {
    assert_eq!(replica_id_for("P1"), replica_id_for("P1"));
    assert_ne!(replica_id_for("P1"), replica_id_for("P2"));
    // First four bytes of sha256("P1"), pinned so the derivation never drifts.
    let hash = Sha256::digest(b"P1");
    assert_eq!(replica_id_for("P1"), u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]));
}

#[test]
fn tick_is_monotonic_at_fixed_time() {
    let clock = ManualClock::new(1000);
    let hlc = HlcClock::with_clock(&clock, 42);

    let t1 = hlc.tick();
    let t2 = hlc.tick();
    let t3 = hlc.tick();

    assert!(t2 > t1);
    assert!(t3 > t2);
    assert_eq!(t1.replica_id, 42);
    assert_eq!(t3.counter, 2);
}

#[test]
fn tick_resets_counter_when_time_advances() {
    let clock = ManualClock::new(1000);
    let hlc = HlcClock::with_clock(&clock, 1);

    hlc.tick();
    hlc.tick();
    clock.advance(100);
    let t = hlc.tick();
    assert_eq!(t.wall_ms, 1100);
    assert_eq!(t.counter, 0);
}

#[test]
fn tick_survives_clock_going_backwards() {
    let clock = ManualClock::new(2000);
    let hlc = HlcClock::with_clock(&clock, 1);

    let t1 = hlc.tick();
    clock.set(1000);
    let t2 = hlc.tick();

    assert_eq!(t2.wall_ms, 2000);
    assert_eq!(t2.counter, 1);
    assert!(t2 > t1);
}

#[test]
fn observe_future_stamp_moves_clock_forward() {
    let clock = ManualClock::new(1000);
    let hlc = HlcClock::with_clock(&clock, 1);

    let future = Hlc::new(5000, 10, 2);
    hlc.observe(&future);
    let next = hlc.tick();

    assert_eq!(next.wall_ms, 5000);
    assert!(next > future);
}

#[test]
fn observe_same_wall_time_passes_remote_counter() {
    let clock = ManualClock::new(1000);
    let hlc = HlcClock::with_clock(&clock, 1);
    hlc.tick();

    let received = Hlc::new(1000, 7, 2);
    hlc.observe(&received);
    let next = hlc.tick();

    assert_eq!(next.wall_ms, 1000);
    assert!(next.counter > received.counter);
}

#[test]
fn observe_past_stamp_keeps_local_time() {
    let clock = ManualClock::new(5000);
    let hlc = HlcClock::with_clock(&clock, 1);
    hlc.tick();
    clock.set(1000);

    hlc.observe(&Hlc::new(2000, 5, 2));
    let next = hlc.tick();

    assert_eq!(next.wall_ms, 5000);
    assert!(next.counter >= 2);
}

#[test]
fn observe_saturated_counter_carries_into_wall_time() {
    let clock = ManualClock::new(1000);
    let hlc = HlcClock::with_clock(&clock, 1);

    let remote = Hlc::new(1000, u32::MAX, 7);
    hlc.observe(&remote);
    let next = hlc.tick();

    assert_eq!(next.wall_ms, 1001);
    assert!(next > remote);
}

#[test]
fn tick_after_saturated_counter_stays_monotonic() {
    let clock = ManualClock::new(1000);
    let hlc = HlcClock::with_clock(&clock, 1);
    hlc.observe(&Hlc::new(1000, u32::MAX - 1, 7));

    let t1 = hlc.tick();
    let t2 = hlc.tick();
    assert_eq!((t1.wall_ms, t1.counter), (1001, 0));
    assert!(t2 > t1);
}

#[test]
fn system_clock_returns_reasonable_time() {
    // After Jan 1, 2020
    assert!(SystemClock.now_ms() > 1_577_836_800_000);
}

#[test]
fn hlc_serialization() {
    let hlc = Hlc::new(12345, 67, 89);
    let json = serde_json::to_string(&hlc).unwrap();
    assert_eq!(serde_json::from_str::<Hlc>(&json).unwrap(), hlc);
}
