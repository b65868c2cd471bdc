// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Live client sessions, kept in an indexed arena.
//!
//! Slots are reused through a free list; each reuse bumps the slot's
//! generation so a stale [`ConnectionId`] never resolves to a newer session.
//! The registry has no interior locking: the owner wraps it in a single
//! writer lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::hlc::{ClockSource, SystemClock};

/// Handle to a registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}.{}", self.index, self.generation)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Kind of client on the other end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Web,
    #[default]
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Web => "web",
            DeviceType::Unknown => "unknown",
        }
    }

    /// Lenient parse for handshake parameters: case is ignored and anything
    /// unrecognized is `Unknown`.
    pub fn from_param(value: Option<&str>) -> Self {
        value.and_then(|v| v.to_ascii_lowercase().parse().ok()).unwrap_or_default()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    /// Accepts the wire spelling only, as serde does.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mobile" => Ok(DeviceType::Mobile),
            "web" => Ok(DeviceType::Web),
            "unknown" => Ok(DeviceType::Unknown),
            _ => Err(Error::InvalidEnum { kind: "device type", value: s.to_string(), valid: "mobile, web, unknown" }),
        }
    }
}

/// One registered client session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConnection {
    pub connection_id: ConnectionId,
    pub device_id: String,
    pub user_id: String,
    pub device_type: DeviceType,
    /// Milliseconds since epoch of the last inbound message.
    pub last_activity: u64,
    pub is_online: bool,
    /// Sockets currently attached to this session.
    pub open_sockets: u32,
    /// When the session went offline, by disconnect or inactivity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_since: Option<u64>,
}

/// Timing knobs for [`ConnectionRegistry::sweep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// Idle time after which an online session is marked offline.
    pub inactivity_timeout_ms: u64,
    /// Time an offline session is kept for reconnection before eviction.
    pub grace_period_ms: u64,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        LivenessPolicy { inactivity_timeout_ms: 60_000, grace_period_ms: 300_000 }
    }
}

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub marked_offline: Vec<ConnectionId>,
    pub evicted: Vec<ConnectionId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.marked_offline.is_empty() && self.evicted.is_empty()
    }
}

struct Slot {
    generation: u32,
    entry: Option<ClientConnection>,
}

/// Arena of client sessions keyed by [`ConnectionId`] and by `(user, device)`.
pub struct ConnectionRegistry<C: ClockSource = SystemClock> {
    clock: C,
    policy: LivenessPolicy,
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_device: HashMap<(String, String), ConnectionId>,
}

impl ConnectionRegistry<SystemClock> {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self::with_clock(policy, SystemClock)
    }
}

impl<C: ClockSource> ConnectionRegistry<C> {
    pub fn with_clock(policy: LivenessPolicy, clock: C) -> Self {
        ConnectionRegistry { clock, policy, slots: Vec::new(), free: Vec::new(), by_device: HashMap::new() }
    }

    pub fn policy(&self) -> LivenessPolicy {
        self.policy
    }

    /// Opens (or resumes) the session of a device.
    ///
    /// A `(user, device)` pair still in the registry gets its existing id
    /// back, so a reconnect within the grace period resumes the same session.
    pub fn register(&mut self, device_id: &str, user_id: Option<&str>, device_type: DeviceType) -> Result<ConnectionId> {
        let user_id = match user_id.map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => return Err(Error::Handshake("userId is required".into())),
        };
        let now = self.clock.now_ms();

        let device_key = (user_id.to_string(), device_id.to_string());
        if let Some(id) = self.by_device.get(&device_key).copied() {
            if let Some(conn) = self.get_mut(id) {
                conn.is_online = true;
                conn.offline_since = None;
                conn.last_activity = now;
                conn.device_type = device_type;
                conn.open_sockets += 1;
                return Ok(id);
            }
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot { generation: 0, entry: None });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = ConnectionId { index, generation: slot.generation };
        slot.entry = Some(ClientConnection {
            connection_id: id,
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            device_type,
            last_activity: now,
            is_online: true,
            open_sockets: 1,
            offline_since: None,
        });
        self.by_device.insert(device_key, id);
        Ok(id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ClientConnection> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ClientConnection> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Records activity. Returns false for unknown ids.
    pub fn touch(&mut self, id: ConnectionId) -> bool {
        let now = self.clock.now_ms();
        match self.get_mut(id) {
            Some(conn) => {
                conn.last_activity = now;
                if !conn.is_online {
                    conn.is_online = true;
                    conn.offline_since = None;
                }
                true
            }
            None => false,
        }
    }

    /// Detaches one socket. The session goes offline once no socket is
    /// left and stays resumable for the grace period.
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        let now = self.clock.now_ms();
        match self.get_mut(id) {
            Some(conn) => {
                conn.open_sockets = conn.open_sockets.saturating_sub(1);
                if conn.open_sockets == 0 && conn.is_online {
                    conn.is_online = false;
                    conn.offline_since = Some(now);
                }
                true
            }
            None => false,
        }
    }

    fn evict(&mut self, id: ConnectionId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation != id.generation {
                return;
            }
            if let Some(conn) = slot.entry.take() {
                self.by_device.remove(&(conn.user_id, conn.device_id));
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
        }
    }

    /// Marks idle sessions offline and evicts sessions offline past the
    /// grace period.
    pub fn sweep(&mut self) -> SweepReport {
        let now = self.clock.now_ms();
        let policy = self.policy;
        let mut report = SweepReport::default();

        for conn in self.slots.iter_mut().filter_map(|slot| slot.entry.as_mut()) {
            if conn.is_online {
                if now.saturating_sub(conn.last_activity) >= policy.inactivity_timeout_ms {
                    conn.is_online = false;
                    conn.offline_since = Some(now);
                    report.marked_offline.push(conn.connection_id);
                }
            } else if let Some(since) = conn.offline_since {
                if now.saturating_sub(since) >= policy.grace_period_ms {
                    report.evicted.push(conn.connection_id);
                }
            }
        }

        for id in &report.evicted {
            self.evict(*id);
        }
        report
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientConnection> + '_ {
        self.slots.iter().filter_map(|slot| slot.entry.as_ref())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn online_count(&self) -> usize {
        self.iter().filter(|c| c.is_online).count()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
