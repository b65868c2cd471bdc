// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! One async mutex per key.
//!
//! Work on the same key is serialized; different keys proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type Slot<T> = Arc<tokio::sync::Mutex<T>>;

pub struct KeyedLocks<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
}

impl<T: Default> KeyedLocks<T> {
    pub fn new() -> Self {
        KeyedLocks { slots: Mutex::new(HashMap::new()) }
    }

    /// The lock for `key`, created on first use.
    pub fn slot(&self, key: &str) -> Slot<T> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Drops slots nobody holds. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<T: Default> Default for KeyedLocks<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
