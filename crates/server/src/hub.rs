// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Live replicated documents, one per entity.
//!
//! Each document sits behind its own async mutex so "merge + persist" is
//! atomic per entity. Merged state is written to the KV store under the
//! `doc` namespace and rehydrated on first access.

use std::sync::Arc;

use fieldsync_core::doc::Document;
use fieldsync_core::protocol::EntityKind;
use fieldsync_core::store::{KvStore, PhotoRepository};
use fieldsync_core::{from_base64, to_base64, Error, ParcelNoteDoc, PhotoMap, PhotoMetadata, Result, SyncStore};
use tracing::{debug, warn};

use crate::locks::KeyedLocks;

/// KV namespace holding base64 document snapshots.
pub const DOC_NAMESPACE: &str = "doc";

/// Runs blocking store work off the async executor.
pub async fn run_blocking<T, F>(store: &Arc<dyn SyncStore>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn SyncStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| Error::StoreUnavailable(format!("store task failed: {e}")))?
}

/// A hydrated document of either kind.
pub enum LiveDoc {
    Note(ParcelNoteDoc),
    Photos(PhotoMap),
}

impl LiveDoc {
    fn new(kind: EntityKind, entity_id: &str) -> Self {
        match kind {
            EntityKind::ParcelNote => LiveDoc::Note(ParcelNoteDoc::new(entity_id)),
            EntityKind::ReportPhotos => LiveDoc::Photos(PhotoMap::new(entity_id)),
        }
    }

    pub fn document(&mut self) -> &mut dyn Document {
        match self {
            LiveDoc::Note(doc) => doc,
            LiveDoc::Photos(doc) => doc,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            LiveDoc::Note(doc) => doc.encode(),
            LiveDoc::Photos(doc) => doc.encode(),
        }
    }

    pub fn photos_mut(&mut self) -> Result<&mut PhotoMap> {
        match self {
            LiveDoc::Photos(map) => Ok(map),
            LiveDoc::Note(_) => Err(Error::InvalidInput("document is not a photo map".into())),
        }
    }

    pub fn note_mut(&mut self) -> Result<&mut ParcelNoteDoc> {
        match self {
            LiveDoc::Note(doc) => Ok(doc),
            LiveDoc::Photos(_) => Err(Error::InvalidInput("document is not a parcel note".into())),
        }
    }
}

/// Server-side registry of live documents.
pub struct DocumentHub {
    store: Arc<dyn SyncStore>,
    docs: KeyedLocks<Option<LiveDoc>>,
}

impl DocumentHub {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        DocumentHub { store, docs: KeyedLocks::new() }
    }

    async fn hydrate(&self, kind: EntityKind, entity_id: &str) -> Result<LiveDoc> {
        let doc_id = kind.document_id(entity_id);
        let owned_id = entity_id.to_string();
        let (snapshot, seed) = run_blocking(&self.store, move |store| {
            let snapshot = store.get(DOC_NAMESPACE, &doc_id)?;
            let seed = match (kind, &snapshot) {
                (EntityKind::ReportPhotos, None) => store.get_photos_by_report_id(&owned_id)?,
                _ => Vec::new(),
            };
            Ok((snapshot, seed))
        })
        .await?;

        let mut doc = LiveDoc::new(kind, entity_id);
        match snapshot {
            Some(encoded) => {
                doc.document().apply(&from_base64(&encoded)?)?;
            }
            None if !seed.is_empty() => {
                debug!(%kind, entity_id, photos = seed.len(), "seeding photo map from photo rows");
                let map = doc.photos_mut()?;
                for photo in &seed {
                    map.add_photo(photo)?;
                }
            }
            None => {}
        }
        Ok(doc)
    }

    async fn persist(&self, kind: EntityKind, entity_id: &str, state: &[u8]) -> Result<()> {
        let doc_id = kind.document_id(entity_id);
        let encoded = to_base64(state);
        run_blocking(&self.store, move |store| store.set(DOC_NAMESPACE, &doc_id, &encoded)).await
    }

    /// Runs `f` on the document and persists the merged state.
    ///
    /// Returns `f`'s output and the full encoded state. If persisting fails
    /// the in-memory copy is dropped so the next access reloads durable state.
    pub async fn write<T, F>(&self, kind: EntityKind, entity_id: &str, f: F) -> Result<(T, Vec<u8>)>
    where
        F: FnOnce(&mut LiveDoc) -> Result<T>,
    {
        let slot = self.docs.slot(&kind.document_id(entity_id));
        let mut guard = slot.lock().await;
        if guard.is_none() {
            *guard = Some(self.hydrate(kind, entity_id).await?);
        }
        let Some(doc) = guard.as_mut() else {
            return Err(Error::Merge(format!("document {entity_id} failed to load")));
        };

        let output = match f(doc) {
            Ok(output) => output,
            Err(e) => {
                // A failed mutation may have written part of its registers.
                *guard = None;
                return Err(e);
            }
        };
        let state = doc.encode()?;
        if let Err(e) = self.persist(kind, entity_id, &state).await {
            warn!(%kind, entity_id, error = %e, "dropping unpersisted document");
            *guard = None;
            return Err(e);
        }
        Ok((output, state))
    }

    /// Runs `f` on the document without persisting.
    pub async fn read<T, F>(&self, kind: EntityKind, entity_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut LiveDoc) -> Result<T>,
    {
        let slot = self.docs.slot(&kind.document_id(entity_id));
        let mut guard = slot.lock().await;
        if guard.is_none() {
            *guard = Some(self.hydrate(kind, entity_id).await?);
        }
        match guard.as_mut() {
            Some(doc) => f(doc),
            None => Err(Error::Merge(format!("document {entity_id} failed to load"))),
        }
    }

    /// Merges an encoded delta; returns the full merged state.
    pub async fn apply(&self, kind: EntityKind, entity_id: &str, update: &[u8]) -> Result<Vec<u8>> {
        let (changed, state) = self.write(kind, entity_id, |doc| doc.document().apply(update)).await?;
        debug!(%kind, entity_id, changed, "merged document update");
        Ok(state)
    }

    /// Full encoded state.
    pub async fn state(&self, kind: EntityKind, entity_id: &str) -> Result<Vec<u8>> {
        self.read(kind, entity_id, |doc| doc.encode()).await
    }

    /// Current photos of a report.
    pub async fn photos(&self, report_id: &str) -> Result<Vec<PhotoMetadata>> {
        self.read(EntityKind::ReportPhotos, report_id, |doc| Ok(doc.photos_mut()?.get_all_photos())).await
    }

    /// Drops documents no task is using; they reload from the store.
    pub fn prune(&self) -> usize {
        self.docs.prune()
    }

    pub fn live_count(&self) -> usize {
        self.docs.len()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
