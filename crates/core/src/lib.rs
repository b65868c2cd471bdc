// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! fieldsync-core: Shared library for the fieldsync sync server
//!
//! This crate provides the convergent document model, change and conflict
//! types, the connection registry, the wire protocol and the SQLite-backed
//! stores used by the fieldsync server.

pub mod change;
pub mod codec;
pub mod conflict;
pub mod db;
pub mod doc;
pub mod error;
pub mod hlc;
pub mod note;
pub mod photo;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod sync_state;

#[cfg(test)]
mod test_support;

pub use change::{ChangeOperation, ChangeResult, ChangeStatus, EntityKey, EntityRecord, LoggedChange, SyncChange};
pub use codec::{from_base64, to_base64, Update};
pub use conflict::{ConflictResolver, Resolution, ResolutionChoice};
pub use db::Database;
pub use doc::{Document, Fields, SyncableDocument};
pub use error::{Error, Result};
pub use hlc::{ClockSource, Hlc, HlcClock, SystemClock};
pub use note::{ParcelNote, ParcelNoteDoc};
pub use photo::{PhotoMap, PhotoMetadata, PhotoStatus};
pub use protocol::{ClientMessage, EntityKind, Envelope, ServerMessage};
pub use registry::{ClientConnection, ConnectionId, ConnectionRegistry, DeviceType, LivenessPolicy, SweepReport};
pub use store::{ChangeSource, EntityStore, KvStore, MemoryStore, PhotoRepository, SqliteStore, SyncStore};
pub use sync_state::{ConflictPolicy, SyncState, SyncStateManager};
