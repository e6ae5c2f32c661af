//! Compiled script blobs and the backends that hold them.
//!
//! ```text
//! cache_meta[revision] ──► CompiledCacheEntry { blob_ref, edit_seq, .. }
//!                                  │
//! compiled[blob_ref]   ◄───────────┘  CompressedBlob (LZ4)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use uuid::Uuid;

use cuebook_core::RevisionId;

use super::rocks::StoreError;

/// Opaque handle of a stored compiled blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(Uuid);

impl BlobRef {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An LZ4-compressed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedBlob {
    /// Original uncompressed size in bytes
    pub original_size: u64,
    /// LZ4-compressed payload, size prepended
    pub compressed: Vec<u8>,
}

impl CompressedBlob {
    pub fn compress(data: &[u8]) -> Self {
        Self {
            original_size: data.len() as u64,
            compressed: lz4_flex::compress_prepend_size(data),
        }
    }

    pub fn decompress(&self) -> Result<Vec<u8>, StoreError> {
        let data = lz4_flex::decompress_size_prepended(&self.compressed)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        if data.len() as u64 != self.original_size {
            return Err(StoreError::Compression(format!(
                "expected {} bytes, got {}",
                self.original_size,
                data.len()
            )));
        }
        Ok(data)
    }

    /// Compression ratio (original / compressed).
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed.is_empty() {
            return 0.0;
        }
        self.original_size as f64 / self.compressed.len() as f64
    }

    pub fn compressed_size(&self) -> usize {
        self.compressed.len()
    }
}

/// Where a revision's compiled script lives and how fresh it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledCacheEntry {
    pub revision_id: RevisionId,
    pub blob_ref: BlobRef,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
    /// Revision `edit_seq` the blob was compiled from.
    pub edit_seq: u64,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl CompiledCacheEntry {
    /// Describe a freshly written blob.
    pub fn for_blob(revision_id: RevisionId, edit_seq: u64, blob: &CompressedBlob) -> Self {
        Self {
            revision_id,
            blob_ref: BlobRef::new_v4(),
            updated_at: now_millis(),
            edit_seq,
            original_size: blob.original_size,
            compressed_size: blob.compressed.len() as u64,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Storage of compiled blobs and their cache entries.
pub trait BlobBackend: Send + Sync {
    fn entry(&self, revision: RevisionId) -> Result<Option<CompiledCacheEntry>, StoreError>;

    fn entries(&self) -> Result<Vec<CompiledCacheEntry>, StoreError>;

    fn blob(&self, blob: BlobRef) -> Result<Option<CompressedBlob>, StoreError>;

    /// Write `blob` and `entry` atomically, deleting the blob the revision's
    /// previous entry pointed at.
    fn put(&self, entry: &CompiledCacheEntry, blob: &CompressedBlob) -> Result<(), StoreError>;

    /// Delete a revision's entry and its blob. `false` if there was none.
    fn remove(&self, revision: RevisionId) -> Result<bool, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<RevisionId, CompiledCacheEntry>,
    blobs: HashMap<BlobRef, CompressedBlob>,
}

/// In-memory backend for services running without a disk path.
#[derive(Default)]
pub struct MemoryBlobs {
    inner: Mutex<MemoryInner>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_count(&self) -> usize {
        self.lock().map(|inner| inner.blobs.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl BlobBackend for MemoryBlobs {
    fn entry(&self, revision: RevisionId) -> Result<Option<CompiledCacheEntry>, StoreError> {
        Ok(self.lock()?.entries.get(&revision).cloned())
    }

    fn entries(&self) -> Result<Vec<CompiledCacheEntry>, StoreError> {
        Ok(self.lock()?.entries.values().cloned().collect())
    }

    fn blob(&self, blob: BlobRef) -> Result<Option<CompressedBlob>, StoreError> {
        Ok(self.lock()?.blobs.get(&blob).cloned())
    }

    fn put(&self, entry: &CompiledCacheEntry, blob: &CompressedBlob) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(previous) = inner.entries.insert(entry.revision_id, entry.clone()) {
            if previous.blob_ref != entry.blob_ref {
                inner.blobs.remove(&previous.blob_ref);
            }
        }
        inner.blobs.insert(entry.blob_ref, blob.clone());
        Ok(())
    }

    fn remove(&self, revision: RevisionId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.entries.remove(&revision) {
            Some(entry) => {
                inner.blobs.remove(&entry.blob_ref);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
