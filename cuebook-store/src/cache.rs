//! Compiled cache: a serialized, compressed page map per revision.
//!
//! An entry is fresh when it was written after the revision's last edit and
//! carries the revision's current `edit_seq`. Anything else reads as
//! [`CacheLookup::NotReady`], which is distinct from a ready script that has
//! no pages.

use std::sync::Arc;

use cuebook_core::{CompiledScript, Revision, RevisionId, ScriptEngine};

use crate::error::ServiceError;
use crate::storage::{BlobBackend, CompiledCacheEntry, CompressedBlob, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Ready(CompiledScript),
    NotReady,
}

impl CacheLookup {
    pub fn is_ready(&self) -> bool {
        matches!(self, CacheLookup::Ready(_))
    }

    pub fn ready(self) -> Option<CompiledScript> {
        match self {
            CacheLookup::Ready(compiled) => Some(compiled),
            CacheLookup::NotReady => None,
        }
    }
}

pub struct CompiledCache {
    backend: Arc<dyn BlobBackend>,
}

impl CompiledCache {
    pub fn new(backend: Arc<dyn BlobBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    /// Compile `revision` from the engine and store the result.
    pub fn compile(
        &self,
        engine: &ScriptEngine,
        revision: RevisionId,
    ) -> Result<CompiledCacheEntry, ServiceError> {
        let compiled = engine.compile(revision)?;
        Ok(self.store(&compiled)?)
    }

    /// Serialize, compress and write a compiled script, replacing the
    /// revision's previous blob.
    pub fn store(&self, compiled: &CompiledScript) -> Result<CompiledCacheEntry, StoreError> {
        let json =
            serde_json::to_vec(compiled).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let blob = CompressedBlob::compress(&json);
        let entry = CompiledCacheEntry::for_blob(compiled.revision_id, compiled.edit_seq, &blob);
        self.backend.put(&entry, &blob)?;
        log::debug!(
            "Stored compiled revision {} ({} pages, {} -> {} bytes)",
            compiled.revision_id,
            compiled.max_page,
            entry.original_size,
            entry.compressed_size
        );
        Ok(entry)
    }

    pub fn is_fresh(entry: &CompiledCacheEntry, revision: &Revision) -> bool {
        entry.updated_at >= revision.edited_at && entry.edit_seq == revision.edit_seq
    }

    /// Read the compiled script of `revision` if a fresh one is stored.
    ///
    /// A missing or undecodable entry or blob invalidates the entry and
    /// reads as not ready; only backend failures are errors.
    pub fn load(&self, revision: &Revision) -> Result<CacheLookup, StoreError> {
        let entry = match self.backend.entry(revision.id) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(CacheLookup::NotReady),
            Err(err) if err.is_corruption() => {
                log::warn!("Cache entry of revision {} is corrupt: {err}", revision.id);
                self.invalidate(revision.id)?;
                return Ok(CacheLookup::NotReady);
            }
            Err(err) => return Err(err),
        };
        if !Self::is_fresh(&entry, revision) {
            return Ok(CacheLookup::NotReady);
        }

        let blob = match self.backend.blob(entry.blob_ref) {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                log::warn!(
                    "Compiled blob {} of revision {} is missing",
                    entry.blob_ref,
                    revision.id
                );
                self.invalidate(revision.id)?;
                return Ok(CacheLookup::NotReady);
            }
            Err(err) if err.is_corruption() => {
                log::warn!(
                    "Compiled blob {} of revision {} is unreadable: {err}",
                    entry.blob_ref,
                    revision.id
                );
                self.invalidate(revision.id)?;
                return Ok(CacheLookup::NotReady);
            }
            Err(err) => return Err(err),
        };

        match Self::decode(&blob) {
            Ok(compiled) if compiled.revision_id == revision.id => Ok(CacheLookup::Ready(compiled)),
            Ok(_) => {
                log::warn!("Compiled blob {} belongs to another revision", entry.blob_ref);
                self.invalidate(revision.id)?;
                Ok(CacheLookup::NotReady)
            }
            Err(err) => {
                log::warn!(
                    "Compiled blob {} of revision {} is corrupt: {err}",
                    entry.blob_ref,
                    revision.id
                );
                self.invalidate(revision.id)?;
                Ok(CacheLookup::NotReady)
            }
        }
    }

    fn decode(blob: &CompressedBlob) -> Result<CompiledScript, StoreError> {
        let json = blob.decompress()?;
        serde_json::from_slice(&json).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    /// Drop a stored entry so the next read rebuilds it.
    pub fn invalidate(&self, revision: RevisionId) -> Result<bool, StoreError> {
        let removed = self.backend.remove(revision)?;
        if removed {
            log::info!("Invalidated compiled cache of revision {revision}");
        }
        Ok(removed)
    }

    /// Delete the entry and blob of a revision that no longer exists.
    pub fn remove(&self, revision: RevisionId) -> Result<bool, StoreError> {
        let removed = self.backend.remove(revision)?;
        if removed {
            log::debug!("Removed compiled cache of deleted revision {revision}");
        }
        Ok(removed)
    }
}
