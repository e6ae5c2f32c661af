//! # cuebook-store: Durable service layer for cuebook
//!
//! Wraps a [`cuebook_core::ScriptEngine`] in a lock, persists its state to
//! RocksDB after every committed mutation, and keeps a compressed compiled
//! view of each revision that is rebuilt in the background.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  commit   ┌──────────────┐
//! │ ScriptService │ ────────► │ ScriptStore  │
//! │ (RwLock)      │           │ (RocksDB)    │
//! └──────┬────────┘           └──────────────┘
//!        │ schedule
//!        ▼
//! ┌───────────────┐  compile  ┌──────────────┐
//! │ RebuildSched. │ ────────► │ CompiledCache│
//! │ (tokio task)  │           │ (LZ4 + JSON) │
//! └──────┬────────┘           └──────────────┘
//!        │ CompiledReady
//!        ▼
//! ┌───────────────┐
//! │ChangeNotifier │ ──► subscribers
//! │ (broadcast)   │
//! └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`service`]: Public entry point, persistence and rollback
//! - [`storage`]: RocksDB store and compiled blob backends
//! - [`cache`]: Freshness checks and compiled script load / store
//! - [`rebuild`]: Deduplicating background rebuild queue
//! - [`notify`]: Change events fanned out to subscribers

pub mod cache;
pub mod error;
pub mod notify;
pub mod rebuild;
pub mod service;
pub mod storage;

pub use cache::{CacheLookup, CompiledCache};
pub use error::ServiceError;
pub use notify::{ChangeNotifier, NotifierStats, ScriptEvent};
pub use rebuild::{RebuildScheduler, RebuildStats};
pub use service::{ScriptService, ServiceConfig};
pub use storage::{
    BlobBackend, BlobRef, CompiledCacheEntry, CompressedBlob, MemoryBlobs, ScriptStore,
    StateStats, StoreConfig, StoreError,
};
