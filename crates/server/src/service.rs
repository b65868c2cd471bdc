// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The sync service shared by every connection.
//!
//! Owns the connection registry, per-device sync state, the document hub and
//! the broadcast channel. Constructed explicitly and started/stopped by the
//! caller; there is no global state.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fieldsync_core::change::{ChangeOperation, EntityKey, SyncChange};
use fieldsync_core::doc::Fields;
use fieldsync_core::photo::PHOTO_FIELDS;
use fieldsync_core::protocol::{
    ConflictResolutionRequest, DocPayload, DocRef, DocUpdateAck, EntityKind, SyncChanges, SyncRequest, SyncResults,
    SyncUpdate,
};
use fieldsync_core::store::{ChangeSource, PhotoRepository};
use fieldsync_core::sync_state::state_key;
use fieldsync_core::{
    from_base64, to_base64, ClockSource, ConflictResolver, ConnectionId, ConnectionRegistry, DeviceType, Error,
    KvStore, PhotoMetadata, Result, ServerMessage, SweepReport, SyncStateManager, SyncStore, SystemClock,
};

use crate::config::Config;
use crate::hub::{run_blocking, DocumentHub};
use crate::locks::KeyedLocks;

/// `entityType` of photo changes mirrored into report photo maps.
pub const PHOTO_ENTITY: &str = "photo";
/// `entityType` of note changes mirrored into parcel note documents.
pub const PARCEL_NOTE_ENTITY: &str = "parcel_note";

/// A message for every session except the one that caused it.
#[derive(Debug, Clone)]
pub struct Broadcast {
    /// Socket that produced the message; 0 for server-originated messages.
    pub origin: u64,
    pub message: ServerMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub connections: usize,
    pub online: usize,
    pub live_documents: usize,
}

/// A registered socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub connection_id: ConnectionId,
    /// Unique per socket, even when sockets share a connection.
    pub socket: u64,
    pub user_id: String,
    pub device_id: String,
}

pub struct SyncService {
    store: Arc<dyn SyncStore>,
    config: Config,
    registry: RwLock<ConnectionRegistry>,
    states: Arc<SyncStateManager>,
    devices: KeyedLocks<()>,
    entities: KeyedLocks<()>,
    hub: DocumentHub,
    broadcast_tx: broadcast::Sender<Broadcast>,
    next_socket: AtomicU64,
    cancel: CancellationToken,
}

impl SyncService {
    pub fn new<S: SyncStore + 'static>(store: Arc<S>, config: Config) -> Self {
        let kv: Arc<dyn KvStore> = store.clone();
        let store: Arc<dyn SyncStore> = store;
        let (broadcast_tx, _) = broadcast::channel(1024);

        SyncService {
            registry: RwLock::new(ConnectionRegistry::new(config.registry.liveness())),
            states: Arc::new(SyncStateManager::new(kv).with_default_policy(config.sync.default_conflict_policy)),
            devices: KeyedLocks::new(),
            entities: KeyedLocks::new(),
            hub: DocumentHub::new(store.clone()),
            store,
            config,
            broadcast_tx,
            next_socket: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        SystemClock.now_ms() as i64
    }

    /// Spawns the liveness sweep. It runs until [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let interval = self.config.registry.sweep_interval();
        let cancel_token = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        service.sweep().await;
                    }
                }
            }
            debug!("sweep task stopped");
        })
    }

    /// Stops the sweep task and tells sessions to wind down.
    pub fn shutdown(&self) {
        info!("sync service shutting down");
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// One liveness pass; also drops idle per-key locks.
    pub async fn sweep(&self) -> SweepReport {
        let report = self.registry.write().await.sweep();
        for id in &report.marked_offline {
            info!(connection = %id, "connection marked offline after inactivity");
        }
        for id in &report.evicted {
            info!(connection = %id, "connection evicted after grace period");
        }
        let devices = self.devices.prune();
        let entities = self.entities.prune();
        let docs = self.hub.prune();
        if devices + entities + docs > 0 {
            debug!(devices, entities, docs, "pruned idle locks");
        }
        report
    }

    // Sessions

    /// Registers a socket. A socket without a device id gets a private one,
    /// so it never resumes another socket's session.
    pub async fn open_session(
        &self,
        device_id: Option<&str>,
        user_id: Option<&str>,
        device_type: DeviceType,
    ) -> Result<SessionTicket> {
        let socket = self.next_socket.fetch_add(1, Ordering::Relaxed);
        let device_id = match device_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("anonymous-{socket}"),
        };
        let mut registry = self.registry.write().await;
        let connection_id = registry.register(&device_id, user_id, device_type)?;
        let conn = registry.get(connection_id).ok_or_else(|| Error::Handshake("session vanished".into()))?;
        Ok(SessionTicket { connection_id, socket, user_id: conn.user_id.clone(), device_id: conn.device_id.clone() })
    }

    /// Registers an evicted ticket's device again. The socket id is kept.
    pub async fn resume_session(&self, ticket: &SessionTicket, device_type: DeviceType) -> Result<SessionTicket> {
        let connection_id =
            self.registry.write().await.register(&ticket.device_id, Some(&ticket.user_id), device_type)?;
        Ok(SessionTicket { connection_id, ..ticket.clone() })
    }

    /// Records activity. Returns false once the session has been evicted.
    pub async fn touch(&self, ticket: &SessionTicket) -> bool {
        self.registry.write().await.touch(ticket.connection_id)
    }

    pub async fn close_session(&self, ticket: &SessionTicket) {
        self.registry.write().await.disconnect(ticket.connection_id);
    }

    #[cfg(test)]
    pub async fn is_online(&self, connection_id: ConnectionId) -> Option<bool> {
        self.registry.read().await.get(connection_id).map(|c| c.is_online)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.broadcast_tx.subscribe()
    }

    fn publish(&self, origin: u64, message: ServerMessage) {
        // No receivers is fine.
        let _ = self.broadcast_tx.send(Broadcast { origin, message });
    }

    pub async fn health(&self) -> Health {
        let registry = self.registry.read().await;
        Health {
            status: if self.cancel.is_cancelled() { "stopping" } else { "ok" },
            connections: registry.len(),
            online: registry.online_count(),
            live_documents: self.hub.live_count(),
        }
    }

    // Entity sync

    /// Changes accepted since the client's cursor, excluding its own.
    ///
    /// The returned cursor is the newest log timestamp read, or the request's
    /// own cursor when nothing new was logged.
    pub async fn sync_request(&self, ticket: &SessionTicket, request: SyncRequest) -> Result<SyncChanges> {
        let limit = self.config.sync.max_changes_per_request;
        let since = request.last_sync_timestamp;
        let states = Arc::clone(&self.states);
        let (user, device) = (ticket.user_id.clone(), ticket.device_id.clone());

        let (logged, state) = run_blocking(&self.store, move |store| {
            let logged = store.changes_since(since, limit)?;
            let state = states.load(&user, &device)?;
            Ok((logged, state))
        })
        .await?;

        let server_timestamp = logged.last().map_or(since, |last| last.server_timestamp);
        let changes = logged
            .into_iter()
            .filter(|c| !(c.user_id == ticket.user_id && c.device_id == ticket.device_id))
            .map(|c| c.change)
            .collect::<Vec<_>>();
        debug!(user = %ticket.user_id, device = %ticket.device_id, since, count = changes.len(), "sync_request");

        Ok(SyncChanges { changes, sync_version: state.sync_version, server_timestamp })
    }

    /// Locks the given entities in key order, so detection, write and log of
    /// one entity never interleave with another device's.
    async fn lock_entities(&self, keys: impl IntoIterator<Item = EntityKey>) -> Vec<OwnedMutexGuard<()>> {
        let keys: BTreeSet<String> = keys.into_iter().map(|k| k.to_string()).collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.entities.slot(&key).lock_owned().await);
        }
        guards
    }

    /// Classifies and applies a batch; bumps `syncVersion` once it is saved.
    pub async fn sync_update(&self, ticket: &SessionTicket, update: SyncUpdate) -> Result<SyncResults> {
        let slot = self.devices.slot(&state_key(&ticket.user_id, &ticket.device_id));
        let _device = slot.lock().await;
        let _entities = self.lock_entities(update.changes.iter().map(SyncChange::entity_key)).await;

        let states = Arc::clone(&self.states);
        let (user, device) = (ticket.user_id.clone(), ticket.device_id.clone());
        let now = self.now_ms();
        let (batch, state) = run_blocking(&self.store, move |store| {
            let mut state = states.load(&user, &device)?;
            if let Some(policy) = update.conflict_resolution {
                state.conflict_resolution = policy;
            }
            let resolver = ConflictResolver::new(store, &user, &device, now);
            let batch = resolver.process_changes(&mut state, update.changes)?;
            let state = states.commit(&state)?;
            Ok((batch, state))
        })
        .await?;

        info!(
            user = %ticket.user_id,
            device = %ticket.device_id,
            changes = batch.results.len(),
            applied = batch.applied.len(),
            version = state.sync_version,
            "sync_update"
        );
        for change in &batch.applied {
            self.mirror(ticket.socket, change).await;
        }
        Ok(SyncResults { results: batch.results, sync_version: state.sync_version })
    }

    /// Settles held conflicts; bumps `syncVersion` once it is saved.
    pub async fn conflict_resolution(
        &self,
        ticket: &SessionTicket,
        request: ConflictResolutionRequest,
    ) -> Result<SyncResults> {
        let slot = self.devices.slot(&state_key(&ticket.user_id, &ticket.device_id));
        let _device = slot.lock().await;

        let states = Arc::clone(&self.states);
        let (user, device) = (ticket.user_id.clone(), ticket.device_id.clone());
        let held = {
            let (states, user, device) = (Arc::clone(&states), user.clone(), device.clone());
            run_blocking(&self.store, move |_| states.load(&user, &device)).await?
        };
        let keys = held
            .pending_changes
            .iter()
            .filter(|c| request.resolutions.iter().any(|r| r.change_id == c.id))
            .map(SyncChange::entity_key)
            .collect::<Vec<_>>();
        let _entities = self.lock_entities(keys).await;

        let now = self.now_ms();
        let (batch, state) = run_blocking(&self.store, move |store| {
            let mut state = states.load(&user, &device)?;
            let resolver = ConflictResolver::new(store, &user, &device, now);
            let batch = resolver.process_resolutions(&mut state, request.resolutions)?;
            let state = states.commit(&state)?;
            Ok((batch, state))
        })
        .await?;

        info!(
            user = %ticket.user_id,
            device = %ticket.device_id,
            resolved = batch.results.len(),
            pending = state.pending_changes.len(),
            version = state.sync_version,
            "conflict_resolution"
        );
        for change in &batch.applied {
            self.mirror(ticket.socket, change).await;
        }
        Ok(SyncResults { results: batch.results, sync_version: state.sync_version })
    }

    /// Feeds an applied entity change into its replicated document and
    /// broadcasts the resulting delta. Failures are logged, not returned.
    async fn mirror(&self, origin: u64, change: &SyncChange) {
        let mirrored = match change.entity_type.as_str() {
            PHOTO_ENTITY => self.mirror_photo(change).await,
            PARCEL_NOTE_ENTITY => self.mirror_note(change).await,
            _ => Ok(None),
        };
        match mirrored {
            Ok(Some((entity_kind, entity_id, delta))) => {
                let payload = DocPayload { entity_kind, entity_id, update: to_base64(&delta) };
                self.publish(origin, ServerMessage::DocUpdate(payload));
            }
            Ok(None) => {}
            Err(e) => warn!(change = %change.id, error = %e, "failed to mirror change into document"),
        }
    }

    async fn mirror_photo(&self, change: &SyncChange) -> Result<Option<(EntityKind, String, Vec<u8>)>> {
        let Some(report_id) = change.data.get("reportId").and_then(Value::as_str) else {
            return Ok(None);
        };
        let report_id = report_id.to_string();
        let photo_id = change.entity_id.clone();
        let operation = change.operation;
        let data = change.data.clone();
        let owner = report_id.clone();

        let (delta, _) = self
            .hub
            .write(EntityKind::ReportPhotos, &report_id, move |doc| {
                let map = doc.photos_mut()?;
                let present = map.document().is_present(&photo_id);
                match operation {
                    ChangeOperation::Delete if present => map.remove_photo(&photo_id).map(Some),
                    ChangeOperation::Delete => Ok(None),
                    _ if !present => {
                        let mut photo: PhotoMetadata = serde_json::from_value(data)?;
                        photo.id = photo_id;
                        photo.report_id = owner;
                        map.add_photo(&photo).map(Some)
                    }
                    _ => {
                        let fields: Fields = data
                            .as_object()
                            .into_iter()
                            .flatten()
                            .filter(|(k, _)| PHOTO_FIELDS.contains(&k.as_str()))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        map.update_photo_metadata(&photo_id, fields).map(Some)
                    }
                }
            })
            .await?;
        if delta.is_some() {
            self.store_photo_rows(&report_id).await?;
        }
        Ok(delta.map(|d| (EntityKind::ReportPhotos, report_id, d)))
    }

    async fn mirror_note(&self, change: &SyncChange) -> Result<Option<(EntityKind, String, Vec<u8>)>> {
        let Some(text) = change.data.get("text").and_then(Value::as_str) else {
            return Ok(None);
        };
        if change.operation == ChangeOperation::Delete {
            return Ok(None);
        }
        let text = text.to_string();
        let (delta, _) =
            self.hub.write(EntityKind::ParcelNote, &change.entity_id, move |doc| doc.note_mut()?.set_text(&text)).await?;
        Ok(Some((EntityKind::ParcelNote, change.entity_id.clone(), delta)))
    }

    // Document sync

    /// Merges a client delta, broadcasts it and returns the merged state.
    pub async fn doc_update(&self, origin: u64, payload: DocPayload) -> Result<DocUpdateAck> {
        let bytes = from_base64(&payload.update)?;
        let state = self.hub.apply(payload.entity_kind, &payload.entity_id, &bytes).await?;
        if payload.entity_kind == EntityKind::ReportPhotos {
            self.store_photo_rows(&payload.entity_id).await?;
        }

        let ack = DocUpdateAck { entity_id: payload.entity_id.clone(), update: to_base64(&state) };
        self.publish(origin, ServerMessage::DocUpdate(payload));
        Ok(ack)
    }

    pub async fn doc_state(&self, doc: DocRef) -> Result<DocPayload> {
        let state = self.hub.state(doc.entity_kind, &doc.entity_id).await?;
        Ok(DocPayload { entity_kind: doc.entity_kind, entity_id: doc.entity_id, update: to_base64(&state) })
    }

    /// Full state and materialized photos of a report.
    pub async fn report_photos(&self, report_id: &str) -> Result<(Vec<u8>, Vec<PhotoMetadata>)> {
        self.hub
            .read(EntityKind::ReportPhotos, report_id, |doc| {
                let state = doc.encode()?;
                Ok((state, doc.photos_mut()?.get_all_photos()))
            })
            .await
    }

    /// Merges a report delta from REST, writes the photo rows and
    /// broadcasts the delta to WebSocket sessions.
    pub async fn merge_report_photos(&self, report_id: &str, update: &[u8]) -> Result<(Vec<u8>, Vec<PhotoMetadata>)> {
        let state = self.hub.apply(EntityKind::ReportPhotos, report_id, update).await?;
        let photos = self.store_photo_rows(report_id).await?;
        let payload =
            DocPayload { entity_kind: EntityKind::ReportPhotos, entity_id: report_id.to_string(), update: to_base64(update) };
        self.publish(0, ServerMessage::DocUpdate(payload));
        Ok((state, photos))
    }

    /// Upserts the report's current photos into the photo rows.
    async fn store_photo_rows(&self, report_id: &str) -> Result<Vec<PhotoMetadata>> {
        let photos = self.hub.photos(report_id).await?;
        let rows = photos.clone();
        let owner = report_id.to_string();
        run_blocking(&self.store, move |store| {
            let existing = store.get_photos_by_report_id(&owner)?;
            for photo in &rows {
                if existing.iter().any(|p| p.id == photo.id) {
                    let mut fields = match serde_json::to_value(photo)? {
                        Value::Object(map) => map,
                        _ => continue,
                    };
                    fields.remove("id");
                    store.update_photo(&photo.id, &fields)?;
                } else {
                    store.create_photo(photo)?;
                }
            }
            Ok(())
        })
        .await?;
        Ok(photos)
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
