//! Persistent storage layer.
//!
//! Architecture:
//! ```text
//! ┌───────────────┐   snapshot    ┌──────────────┐
//! │ ScriptService │ ────────────► │ ScriptStore  │
//! │ (engine)      │               │ (RocksDB)    │
//! └──────┬────────┘               └──────┬───────┘
//!        │ compiled blobs                │ column families
//!        ▼                               ▼
//! ┌───────────────┐   ┌──────────────────────────────────────┐
//! │ BlobBackend   │   │ CF "state"     : engine snapshot     │
//! │ (store / mem) │   │ CF "compiled"  : compiled blobs      │
//! └───────────────┘   │ CF "cache_meta": per-revision entry  │
//!                     └──────────────────────────────────────┘
//! ```

pub mod blob;
pub mod rocks;

pub use blob::{BlobBackend, BlobRef, CompiledCacheEntry, CompressedBlob, MemoryBlobs};
pub use rocks::{ScriptStore, StateStats, StoreConfig, StoreError};
