//! RocksDB-backed persistent script store.
//!
//! Column families:
//! - `state`     : Engine snapshot (bincode, LZ4 compressed), single key
//! - `compiled`  : Compiled script blobs keyed by `BlobRef`
//! - `cache_meta`: `CompiledCacheEntry` per revision (bincode)
//!
//! A compiled blob and the entry pointing at it are always written in one
//! batch, together with the deletion of the blob the entry used to point at.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

use cuebook_core::{EngineSnapshot, RevisionId};

use super::blob::{BlobBackend, BlobRef, CompiledCacheEntry, CompressedBlob};

const CF_STATE: &str = "state";
const CF_COMPILED: &str = "compiled";
const CF_CACHE_META: &str = "cache_meta";

const COLUMN_FAMILIES: &[&str] = &[CF_STATE, CF_COMPILED, CF_CACHE_META];

/// Key of the engine snapshot inside `state`.
const STATE_KEY: &[u8] = b"engine";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cuebook_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// A stored value could not be decoded. The value is bad, the store is not.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::Deserialization(_) | StoreError::Compression(_)
        )
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

/// Sizes of a persisted engine snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateStats {
    pub original_size: u64,
    pub compressed_size: u64,
}

/// RocksDB-backed script store.
pub struct ScriptStore {
    /// RocksDB instance (single-threaded mode: callers serialize writes)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl ScriptStore {
    /// Open the store at the configured path, creating the database and its
    /// column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened script store at {}", config.path.display());

        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_STATE | CF_COMPILED => {
                // Payloads are LZ4 compressed before they get here
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(2);
            }
            CF_CACHE_META => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    // ─── Engine state ─────────────────────────────────────────────────

    /// Persist the whole engine state, replacing the previous snapshot.
    pub fn save_state(&self, snapshot: &EngineSnapshot) -> Result<StateStats, StoreError> {
        let cf = self.cf(CF_STATE)?;
        let encoded = encode(snapshot)?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);

        self.db.put_cf_opt(&cf, STATE_KEY, &compressed, &self.write_options())?;

        Ok(StateStats {
            original_size: encoded.len() as u64,
            compressed_size: compressed.len() as u64,
        })
    }

    /// Load the persisted engine state, `None` for a fresh store.
    pub fn load_state(&self) -> Result<Option<EngineSnapshot>, StoreError> {
        let cf = self.cf(CF_STATE)?;
        match self.db.get_cf(&cf, STATE_KEY)? {
            Some(compressed) => {
                let encoded = lz4_flex::decompress_size_prepended(&compressed)
                    .map_err(|e| StoreError::Compression(e.to_string()))?;
                decode(&encoded).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Force a flush of the memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }
}

impl BlobBackend for ScriptStore {
    fn entry(&self, revision: RevisionId) -> Result<Option<CompiledCacheEntry>, StoreError> {
        let cf = self.cf(CF_CACHE_META)?;
        self.db
            .get_cf(&cf, revision.as_uuid().as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn entries(&self) -> Result<Vec<CompiledCacheEntry>, StoreError> {
        let cf = self.cf(CF_CACHE_META)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            match decode(&value) {
                Ok(entry) => entries.push(entry),
                Err(err) => log::warn!("Skipping undecodable cache entry {key:?}: {err}"),
            }
        }
        Ok(entries)
    }

    fn blob(&self, blob: BlobRef) -> Result<Option<CompressedBlob>, StoreError> {
        let cf = self.cf(CF_COMPILED)?;
        self.db
            .get_cf(&cf, blob.as_uuid().as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn put(&self, entry: &CompiledCacheEntry, blob: &CompressedBlob) -> Result<(), StoreError> {
        let cf_compiled = self.cf(CF_COMPILED)?;
        let cf_meta = self.cf(CF_CACHE_META)?;
        let key = entry.revision_id.as_uuid().as_bytes().to_vec();

        let mut batch = WriteBatch::default();
        match self.entry(entry.revision_id) {
            Ok(Some(previous)) if previous.blob_ref != entry.blob_ref => {
                batch.delete_cf(&cf_compiled, previous.blob_ref.as_uuid().as_bytes());
            }
            Ok(_) => {}
            // The old blob is unreachable; overwriting the entry is the repair.
            Err(err) if err.is_corruption() => {
                log::warn!(
                    "Replacing undecodable cache entry of revision {}: {err}",
                    entry.revision_id
                );
            }
            Err(err) => return Err(err),
        }
        batch.put_cf(&cf_compiled, entry.blob_ref.as_uuid().as_bytes(), encode(blob)?);
        batch.put_cf(&cf_meta, &key, encode(entry)?);

        self.db.write_opt(batch, &self.write_options())?;
        Ok(())
    }

    fn remove(&self, revision: RevisionId) -> Result<bool, StoreError> {
        let cf_compiled = self.cf(CF_COMPILED)?;
        let cf_meta = self.cf(CF_CACHE_META)?;
        let key = revision.as_uuid().as_bytes();
        let Some(bytes) = self.db.get_cf(&cf_meta, key)? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        match decode::<CompiledCacheEntry>(&bytes) {
            Ok(entry) => batch.delete_cf(&cf_compiled, entry.blob_ref.as_uuid().as_bytes()),
            Err(err) => log::warn!("Dropping undecodable cache entry of revision {revision}: {err}"),
        }
        batch.delete_cf(&cf_meta, key);
        self.db.write_opt(batch, &self.write_options())?;
        Ok(true)
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheLookup, CompiledCache};
    use cuebook_core::{LineDraft, LineEdit, PageEdit, Revision, ScriptEngine, ScriptMode};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sample_engine() -> ScriptEngine {
        let mut engine = ScriptEngine::new();
        let script = engine.create_script("Pericles", ScriptMode::Full).unwrap();
        let root = engine.current_revision(script).unwrap();
        let edit = PageEdit::new(vec![
            LineEdit::Added(LineDraft::stage_direction(1, "Enter Gower")),
            LineEdit::Added(LineDraft::spacing(1)),
        ]);
        engine.apply_page_edit(root, 1, &edit).unwrap();
        engine
    }

    #[test]
    fn test_store_open() {
        let dir = tempdir().unwrap();
        let store = ScriptStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.load_state().unwrap(), None);
    }

    #[test]
    fn test_state_save_load() {
        let dir = tempdir().unwrap();
        let store = ScriptStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        let engine = sample_engine();
        let snapshot = engine.snapshot();

        let stats = store.save_state(&snapshot).unwrap();
        assert!(stats.compressed_size > 0);

        let loaded = store.load_state().unwrap().unwrap();
        let restored = ScriptEngine::from_snapshot(loaded);
        let script = engine.scripts()[0].id;
        let root = engine.current_revision(script).unwrap();
        assert_eq!(restored.get_page(root, 1).unwrap(), engine.get_page(root, 1).unwrap());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let snapshot = sample_engine().snapshot();
        {
            let store = ScriptStore::open(StoreConfig::for_testing(&path)).unwrap();
            store.save_state(&snapshot).unwrap();
            store.sync().unwrap();
        }
        let store = ScriptStore::open(StoreConfig::for_testing(&path)).unwrap();
        let loaded = store.load_state().unwrap().unwrap();
        assert_eq!(loaded.lines.len(), snapshot.lines.len());
        assert_eq!(loaded.revisions, snapshot.revisions);
    }

    #[test]
    fn test_put_replaces_previous_blob() {
        let dir = tempdir().unwrap();
        let store = ScriptStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        let revision = RevisionId::new_v4();

        let first = CompiledCacheEntry::for_blob(revision, 1, &CompressedBlob::compress(b"one"));
        store.put(&first, &CompressedBlob::compress(b"one")).unwrap();
        let second = CompiledCacheEntry::for_blob(revision, 2, &CompressedBlob::compress(b"two"));
        store.put(&second, &CompressedBlob::compress(b"two")).unwrap();

        assert_eq!(store.entry(revision).unwrap(), Some(second.clone()));
        assert!(store.blob(first.blob_ref).unwrap().is_none());
        let blob = store.blob(second.blob_ref).unwrap().unwrap();
        assert_eq!(blob.decompress().unwrap(), b"two");
        assert_eq!(store.entries().unwrap().len(), 1);

        assert!(store.remove(revision).unwrap());
        assert!(!store.remove(revision).unwrap());
        assert!(store.blob(second.blob_ref).unwrap().is_none());
    }

    /// A RocksDB-backed cache holding one fresh compiled revision.
    fn cached_store(
        dir: &std::path::Path,
    ) -> (Arc<ScriptStore>, CompiledCache, ScriptEngine, Revision) {
        let store = Arc::new(ScriptStore::open(StoreConfig::for_testing(dir.join("db"))).unwrap());
        let cache = CompiledCache::new(store.clone());
        let engine = sample_engine();
        let root = engine.current_revision(engine.scripts()[0].id).unwrap();
        cache.compile(&engine, root).unwrap();
        let revision = engine.revision(root).unwrap();
        (store, cache, engine, revision)
    }

    #[test]
    fn test_garbled_blob_value_reads_not_ready() {
        let dir = tempdir().unwrap();
        let (store, cache, engine, revision) = cached_store(dir.path());
        assert!(cache.load(&revision).unwrap().is_ready());

        let entry = store.entry(revision.id).unwrap().unwrap();
        let cf = store.cf(CF_COMPILED).unwrap();
        store.db.put_cf(&cf, entry.blob_ref.as_uuid().as_bytes(), [0xff]).unwrap();
        assert!(store.blob(entry.blob_ref).unwrap_err().is_corruption());

        assert_eq!(cache.load(&revision).unwrap(), CacheLookup::NotReady);
        assert!(store.entry(revision.id).unwrap().is_none());
        assert!(store.blob(entry.blob_ref).unwrap().is_none());

        cache.compile(&engine, revision.id).unwrap();
        assert!(cache.load(&revision).unwrap().is_ready());
    }

    #[test]
    fn test_garbled_entry_value_reads_not_ready() {
        let dir = tempdir().unwrap();
        let (store, cache, engine, revision) = cached_store(dir.path());

        let cf = store.cf(CF_CACHE_META).unwrap();
        store.db.put_cf(&cf, revision.id.as_uuid().as_bytes(), [0xff]).unwrap();
        assert!(store.entry(revision.id).unwrap_err().is_corruption());
        assert!(store.entries().unwrap().is_empty());

        assert_eq!(cache.load(&revision).unwrap(), CacheLookup::NotReady);
        assert!(store.entry(revision.id).unwrap().is_none());

        cache.compile(&engine, revision.id).unwrap();
        assert!(cache.load(&revision).unwrap().is_ready());
    }
}
