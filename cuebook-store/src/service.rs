//! Script service: the engine behind a lock, made durable and observable.
//!
//! Architecture:
//! ```text
//! caller ──► ScriptService ──write lock──► ScriptEngine (staged txn)
//!                 │                              │
//!                 │ snapshot after commit        │
//!                 ▼                              ▼
//!           ScriptStore (RocksDB)        RebuildScheduler ──► CompiledCache
//!                 │                              │
//!                 └──────────► ChangeNotifier ◄──┘
//! ```
//!
//! Mutations are synchronous. The rebuilds they schedule run on the tokio
//! runtime the service was opened in; no request ever waits for one.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tokio::sync::broadcast;

use cuebook_core::{
    Cue, CueId, CueTypeId, Line, LineId, LinePartId, PageEdit, PageEditSummary, Revision,
    RevisionDeletion, RevisionId, Script, ScriptEngine, ScriptError, ScriptId, ScriptMode,
    SweepStats,
};

use crate::cache::{CacheLookup, CompiledCache};
use crate::error::ServiceError;
use crate::notify::{ChangeNotifier, NotifierStats, ScriptEvent};
use crate::rebuild::{RebuildScheduler, RebuildStats};
use crate::storage::{BlobBackend, MemoryBlobs, ScriptStore, StoreConfig};

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Persistent storage (None = in-memory only)
    pub storage: Option<StoreConfig>,
    /// Events buffered per subscriber before it lags
    pub notify_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: None,
            notify_capacity: 256,
        }
    }
}

impl ServiceConfig {
    pub fn for_testing(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            storage: Some(StoreConfig::for_testing(path)),
            notify_capacity: 64,
        }
    }
}

pub struct ScriptService {
    engine: Arc<RwLock<ScriptEngine>>,
    store: Option<Arc<ScriptStore>>,
    cache: Arc<CompiledCache>,
    notifier: Arc<ChangeNotifier>,
    rebuilds: RebuildScheduler,
}

impl ScriptService {
    /// Open the service, restoring persisted state if storage is configured.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: ServiceConfig) -> Result<Self, ServiceError> {
        let store = config
            .storage
            .map(ScriptStore::open)
            .transpose()?
            .map(Arc::new);

        let engine = match store.as_ref().map(|s| s.load_state()).transpose()?.flatten() {
            Some(snapshot) => {
                let engine = ScriptEngine::from_snapshot(snapshot);
                log::info!(
                    "Recovered {} scripts and {} lines from storage",
                    engine.scripts().len(),
                    engine.line_count()
                );
                engine
            }
            None => ScriptEngine::new(),
        };

        let backend: Arc<dyn BlobBackend> = match &store {
            Some(store) => store.clone(),
            None => Arc::new(MemoryBlobs::new()),
        };
        let cache = Arc::new(CompiledCache::new(backend));

        // Entries of revisions that did not survive a crash.
        let mut pruned = 0;
        for entry in cache.backend().entries()? {
            if engine.revision(entry.revision_id).is_err() && cache.remove(entry.revision_id)? {
                pruned += 1;
            }
        }
        if pruned > 0 {
            log::warn!("Pruned {pruned} compiled cache entries of unknown revisions");
        }

        let engine = Arc::new(RwLock::new(engine));
        let notifier = Arc::new(ChangeNotifier::new(config.notify_capacity));
        let rebuilds =
            RebuildScheduler::spawn(Arc::clone(&engine), Arc::clone(&cache), Arc::clone(&notifier))?;

        Ok(Self {
            engine,
            store,
            cache,
            notifier,
            rebuilds,
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ScriptEngine>, ServiceError> {
        self.engine
            .read()
            .map_err(|_| ScriptError::LockPoisoned.into())
    }

    /// Run a mutation under the write lock and persist the result. On a
    /// persistence failure the engine is rolled back.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut ScriptEngine) -> Result<T, ScriptError>,
    ) -> Result<T, ServiceError> {
        let mut engine = self.engine.write().map_err(|_| ScriptError::LockPoisoned)?;
        let backup = self.store.as_ref().map(|_| engine.clone());
        let out = op(&mut engine)?;

        if let Some(store) = &self.store {
            if let Err(err) = store.save_state(&engine.snapshot()) {
                log::error!("Persisting engine state failed, rolling back: {err}");
                if let Some(backup) = backup {
                    *engine = backup;
                }
                return Err(err.into());
            }
        }
        Ok(out)
    }

    // ─── Scripts & revisions ─────────────────────────────────────────

    pub fn create_script(&self, name: &str, mode: ScriptMode) -> Result<ScriptId, ServiceError> {
        let (script_id, root) = self.mutate(|engine| {
            let script = engine.create_script(name, mode)?;
            Ok((script, engine.current_revision(script)?))
        })?;
        self.rebuilds.schedule(root);
        self.notifier.notify(ScriptEvent::RevisionsChanged { script_id });
        Ok(script_id)
    }

    pub fn script(&self, id: ScriptId) -> Result<Script, ServiceError> {
        Ok(self.read()?.script(id)?)
    }

    pub fn scripts(&self) -> Result<Vec<Script>, ServiceError> {
        Ok(self.read()?.scripts())
    }

    pub fn revision(&self, id: RevisionId) -> Result<Revision, ServiceError> {
        Ok(self.read()?.revision(id)?)
    }

    pub fn revisions(&self, script: ScriptId) -> Result<Vec<Revision>, ServiceError> {
        Ok(self.read()?.revisions(script)?)
    }

    pub fn revision_tree(&self, script: ScriptId) -> Result<Vec<Vec<RevisionId>>, ServiceError> {
        Ok(self.read()?.revision_tree(script)?)
    }

    pub fn current_revision(&self, script: ScriptId) -> Result<RevisionId, ServiceError> {
        Ok(self.read()?.current_revision(script)?)
    }

    pub fn create_revision(
        &self,
        script: ScriptId,
        parent: Option<RevisionId>,
        description: &str,
        set_as_current: bool,
    ) -> Result<RevisionId, ServiceError> {
        let revision = self.mutate(|engine| {
            engine.create_revision(script, parent, description, set_as_current)
        })?;
        self.rebuilds.schedule(revision);
        self.notifier
            .notify(ScriptEvent::RevisionsChanged { script_id: script });
        if set_as_current {
            self.notifier.notify(ScriptEvent::CurrentRevisionChanged {
                script_id: script,
                revision_id: Some(revision),
            });
        }
        Ok(revision)
    }

    /// Delete a revision, its compiled cache entry, and any content only it
    /// referenced.
    pub fn delete_revision(&self, revision: RevisionId) -> Result<RevisionDeletion, ServiceError> {
        let deletion = self.mutate(|engine| engine.delete_revision(revision))?;
        if let Err(err) = self.cache.remove(revision) {
            // The entry is pruned on the next open.
            log::warn!("Could not remove compiled cache of revision {revision}: {err}");
        }

        let script_id = deletion.script_id;
        self.notifier.notify(ScriptEvent::RevisionsChanged { script_id });
        if deletion.current_changed {
            self.notifier.notify(ScriptEvent::CurrentRevisionChanged {
                script_id,
                revision_id: deletion.current_revision,
            });
        }
        Ok(deletion)
    }

    pub fn set_current_revision(
        &self,
        script: ScriptId,
        revision: RevisionId,
    ) -> Result<(), ServiceError> {
        self.mutate(|engine| engine.set_current_revision(script, revision))?;
        self.notifier.notify(ScriptEvent::CurrentRevisionChanged {
            script_id: script,
            revision_id: Some(revision),
        });
        Ok(())
    }

    // ─── Pages ───────────────────────────────────────────────────────

    pub fn get_page(&self, revision: RevisionId, page: u32) -> Result<Vec<Line>, ServiceError> {
        Ok(self.read()?.get_page(revision, page)?)
    }

    pub fn get_max_page(&self, revision: RevisionId) -> Result<u32, ServiceError> {
        Ok(self.read()?.get_max_page(revision)?)
    }

    pub fn apply_page_edit(
        &self,
        revision: RevisionId,
        page: u32,
        edit: &PageEdit,
    ) -> Result<PageEditSummary, ServiceError> {
        let (script_id, summary) = self.mutate(|engine| {
            let summary = engine.apply_page_edit(revision, page, edit)?;
            Ok((engine.revision(revision)?.script_id, summary))
        })?;
        self.rebuilds.schedule(revision);
        self.notifier.notify(ScriptEvent::ScriptChanged {
            script_id,
            revision_id: revision,
            page: Some(page),
        });
        Ok(summary)
    }

    // ─── Cuts & cues ─────────────────────────────────────────────────

    fn after_cue_change(&self, script_id: ScriptId, revision: RevisionId) {
        self.rebuilds.schedule(revision);
        self.notifier.notify(ScriptEvent::CuesChanged {
            script_id,
            revision_id: revision,
        });
    }

    pub fn set_cuts(&self, revision: RevisionId, parts: &[LinePartId]) -> Result<(), ServiceError> {
        let script_id = self.mutate(|engine| {
            engine.set_cuts(revision, parts)?;
            Ok(engine.revision(revision)?.script_id)
        })?;
        self.rebuilds.schedule(revision);
        self.notifier.notify(ScriptEvent::ScriptChanged {
            script_id,
            revision_id: revision,
            page: None,
        });
        Ok(())
    }

    pub fn get_cuts(&self, revision: RevisionId) -> Result<Vec<LinePartId>, ServiceError> {
        Ok(self.read()?.get_cuts(revision)?)
    }

    pub fn add_cue(
        &self,
        revision: RevisionId,
        line: LineId,
        cue_type: CueTypeId,
        ident: &str,
    ) -> Result<CueId, ServiceError> {
        let (script_id, cue) = self.mutate(|engine| {
            let cue = engine.add_cue(revision, line, cue_type, ident)?;
            Ok((engine.revision(revision)?.script_id, cue))
        })?;
        self.after_cue_change(script_id, revision);
        Ok(cue)
    }

    pub fn update_cue(
        &self,
        revision: RevisionId,
        line: LineId,
        cue: CueId,
        cue_type: CueTypeId,
        ident: &str,
    ) -> Result<CueId, ServiceError> {
        let (script_id, cue) = self.mutate(|engine| {
            let cue = engine.update_cue(revision, line, cue, cue_type, ident)?;
            Ok((engine.revision(revision)?.script_id, cue))
        })?;
        self.after_cue_change(script_id, revision);
        Ok(cue)
    }

    /// Detach a cue from a line. Returns whether the cue itself was collected.
    pub fn remove_cue(
        &self,
        revision: RevisionId,
        line: LineId,
        cue: CueId,
    ) -> Result<bool, ServiceError> {
        let (script_id, collected) = self.mutate(|engine| {
            let collected = engine.remove_cue(revision, line, cue)?;
            Ok((engine.revision(revision)?.script_id, collected))
        })?;
        self.after_cue_change(script_id, revision);
        Ok(collected)
    }

    pub fn cues(&self, revision: RevisionId) -> Result<BTreeMap<LineId, Vec<Cue>>, ServiceError> {
        Ok(self.read()?.cues(revision)?)
    }

    pub fn cue_stats(&self, revision: RevisionId) -> Result<BTreeMap<CueTypeId, usize>, ServiceError> {
        Ok(self.read()?.cue_stats(revision)?)
    }

    // ─── Compiled cache ──────────────────────────────────────────────

    /// The compiled script of `revision`, or `NotReady` with a rebuild
    /// scheduled.
    pub fn get_compiled(&self, revision: RevisionId) -> Result<CacheLookup, ServiceError> {
        let rev = self.read()?.revision(revision)?;
        let lookup = self.cache.load(&rev)?;
        if !lookup.is_ready() {
            self.rebuilds.schedule(revision);
        }
        Ok(lookup)
    }

    // ─── Maintenance ─────────────────────────────────────────────────

    /// Collect stray lines and cues no revision references.
    pub fn sweep(&self) -> Result<SweepStats, ServiceError> {
        self.mutate(|engine| Ok(engine.sweep()))
    }

    /// Flush persistent storage, if any.
    pub fn sync(&self) -> Result<(), ServiceError> {
        if let Some(store) = &self.store {
            store.sync()?;
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScriptEvent> {
        self.notifier.subscribe()
    }

    pub fn notifier_stats(&self) -> NotifierStats {
        self.notifier.stats()
    }

    pub fn rebuild_stats(&self) -> RebuildStats {
        self.rebuilds.stats()
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }
}
