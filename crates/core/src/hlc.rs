// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Hybrid Logical Clock (HLC) used to order concurrent document writes.
//!
//! Ordering rules:
//! 1. Higher wall_ms wins
//! 2. If wall_ms equal, higher counter wins
//! 3. If both equal, higher replica_id wins
//!
//! Replica ids are derived from the entity id (see [`replica_id_for`]), so two
//! processes editing the same entity may produce identical stamps. Documents
//! break that final tie on the written value (see `doc`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Hybrid Logical Clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hlc {
    /// Wall clock time in milliseconds since Unix epoch.
    pub wall_ms: u64,
    /// Logical counter for ordering events at the same wall time.
    pub counter: u32,
    /// Replica identifier, the last tiebreaker.
    pub replica_id: u32,
}

impl Hlc {
    pub fn new(wall_ms: u64, counter: u32, replica_id: u32) -> Self {
        Hlc { wall_ms, counter, replica_id }
    }

    /// The earliest possible stamp; every real write sorts after it.
    pub fn min() -> Self {
        Hlc { wall_ms: 0, counter: 0, replica_id: 0 }
    }

    /// Returns true if this HLC is strictly greater than the other.
    pub fn is_after(&self, other: &Hlc) -> bool {
        self > other
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms
            .cmp(&other.wall_ms)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.replica_id.cmp(&other.replica_id))
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Derives the replica id for an entity.
///
/// Stable across processes and platforms: the first four bytes of the
/// SHA-256 of the entity id, big-endian.
pub fn replica_id_for(entity_id: &str) -> u32 {
    let hash = Sha256::digest(entity_id.as_bytes());
    u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
}

/// Trait for getting the current wall clock time.
///
/// Shared by the clock, the connection registry and the sync state manager so
/// tests can drive time by hand.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// System clock implementation using `std::time::SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

impl<C: ClockSource> ClockSource for &C {
    fn now_ms(&self) -> u64 {
        (*self).now_ms()
    }
}

impl<C: ClockSource + ?Sized> ClockSource for std::sync::Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Produces monotonically increasing stamps for one replica.
///
/// `(last_wall_ms, last_counter)` live under a single lock so `tick` and
/// `observe` never interleave.
pub struct HlcClock<C: ClockSource = SystemClock> {
    clock: C,
    replica_id: u32,
    last: Mutex<(u64, u32)>,
}

impl HlcClock<SystemClock> {
    pub fn new(replica_id: u32) -> Self {
        Self::with_clock(SystemClock, replica_id)
    }
}

impl<C: ClockSource> HlcClock<C> {
    /// Creates a clock reading wall time from a custom source.
    pub fn with_clock(clock: C, replica_id: u32) -> Self {
        HlcClock { clock, replica_id, last: Mutex::new((0, 0)) }
    }

    pub fn replica_id(&self) -> u32 {
        self.replica_id
    }

    /// Current wall time from the underlying source.
    pub fn wall_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Generates a stamp for a local write.
    ///
    /// Monotonic even if the wall clock goes backwards.
    pub fn tick(&self) -> Hlc {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        *last = if physical > last.0 { (physical, 0) } else { successor(last.0, last.1) };

        Hlc::new(last.0, last.1, self.replica_id)
    }

    /// Folds a remote stamp into the clock so later local writes sort after it.
    pub fn observe(&self, received: &Hlc) {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        *last = if physical > last.0 && physical > received.wall_ms {
            (physical, 0)
        } else if received.wall_ms > last.0 {
            successor(received.wall_ms, received.counter)
        } else if received.wall_ms == last.0 {
            successor(last.0, last.1.max(received.counter))
        } else {
            successor(last.0, last.1)
        };
    }
}

/// The next `(wall_ms, counter)` after the given one. A saturated counter
/// carries into the wall time.
fn successor(wall_ms: u64, counter: u32) -> (u64, u32) {
    match counter.checked_add(1) {
        Some(counter) => (wall_ms, counter),
        None => (wall_ms.saturating_add(1), 0),
    }
}

#[cfg(test)]
#[path = "hlc_tests.rs"]
mod tests;
