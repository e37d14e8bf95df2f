use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::document::{ClientDocument, DocumentState, Edit, Shadow};
use crate::error::{Result, SyncError};

/// Everything tracked for one document. Guarded by the per-document lock.
#[derive(Debug)]
pub struct DocumentEntry<C, D> {
    pub document: ClientDocument<C>,
    pub shadow: Shadow<C>,
    /// Edits handed to the transport are removed; the rest wait for the next connect.
    pub pending: VecDeque<Edit<D>>,
    pub state: DocumentState,
    /// Connection the document was last announced on.
    pub announced_on: Option<u64>,
}

impl<C, D> DocumentEntry<C, D> {
    fn new(document: ClientDocument<C>) -> Self
    where
        C: Default,
    {
        let shadow = Shadow::initial(&document);
        Self {
            document,
            shadow,
            pending: VecDeque::new(),
            state: DocumentState::Clean,
            announced_on: None,
        }
    }

    /// Edits made while offline that the server has not seen yet.
    pub fn has_queued_edits(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Replace the shadow. A shadow older than the current one is rejected.
    pub fn save_shadow(&mut self, shadow: Shadow<C>) -> Result<()> {
        if shadow.version < self.shadow.version {
            return Err(SyncError::VersionConflict {
                document_id: self.document.id.clone(),
                edit_version: shadow.version,
                shadow_version: self.shadow.version,
            });
        }
        self.shadow = shadow;
        Ok(())
    }
}

pub type EntryHandle<C, D> = Arc<Mutex<DocumentEntry<C, D>>>;

/// In-memory documents, shadows and pending edits keyed by document id.
///
/// Each document sits behind its own lock, so work on different documents never
/// contends while work on the same document serializes.
pub struct DocumentStore<C, D> {
    entries: DashMap<String, EntryHandle<C, D>>,
}

impl<C, D> Default for DocumentStore<C, D> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<C: Clone + Default, D> DocumentStore<C, D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document with its version 0 shadow. Never overwrites an existing entry.
    pub fn put(&self, document: ClientDocument<C>) -> Result<()> {
        self.put_with(document, |_| ())
    }

    /// Like [`put`](Self::put), but runs `then` on the new entry before anyone else
    /// can lock it.
    pub fn put_with<R>(
        &self,
        document: ClientDocument<C>,
        then: impl FnOnce(&mut DocumentEntry<C, D>) -> R,
    ) -> Result<R> {
        use dashmap::mapref::entry::Entry;

        let id = document.id.clone();
        let handle = Arc::new(Mutex::new(DocumentEntry::new(document)));
        let mut entry = handle.lock();
        match self.entries.entry(id) {
            Entry::Occupied(slot) => return Err(SyncError::DuplicateDocument(slot.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&handle));
            }
        }
        Ok(then(&mut entry))
    }

    /// Handle to the per-document lock. The map guard is released before returning.
    pub fn entry(&self, document_id: &str) -> Result<EntryHandle<C, D>> {
        self.entries
            .get(document_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SyncError::NotFound(document_id.to_string()))
    }

    pub fn get(&self, document_id: &str) -> Result<ClientDocument<C>> {
        Ok(self.entry(document_id)?.lock().document.clone())
    }

    pub fn shadow(&self, document_id: &str) -> Result<Shadow<C>> {
        Ok(self.entry(document_id)?.lock().shadow.clone())
    }

    /// Replace the shadow. A shadow older than the stored one is rejected.
    pub fn save_shadow(&self, document_id: &str, shadow: Shadow<C>) -> Result<()> {
        self.entry(document_id)?.lock().save_shadow(shadow)
    }

    pub fn remove(&self, document_id: &str) -> Option<ClientDocument<C>> {
        self.entries
            .remove(document_id)
            .map(|(_, handle)| {
                let entry = handle.lock();
                entry.document.clone()
            })
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.entries.contains_key(document_id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
