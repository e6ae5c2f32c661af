//! Fire-and-forget compiled cache rebuilds.
//!
//! ```text
//! schedule(rev) ──► pending set ──► mpsc queue ──► worker task
//!   (dedup)                                          │ read lock
//!                                                    ▼
//!                                  CompiledCache::compile ──► CompiledReady
//! ```
//!
//! A revision is taken off the pending set before it is compiled, so an edit
//! landing during a rebuild queues another one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cuebook_core::{RevisionId, ScriptEngine};

use crate::cache::CompiledCache;
use crate::error::ServiceError;
use crate::notify::{ChangeNotifier, ScriptEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub scheduled: u64,
    pub completed: u64,
    pub failed: u64,
    /// Revisions deleted before their rebuild ran.
    pub skipped: u64,
}

#[derive(Default)]
struct AtomicRebuildStats {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

pub struct RebuildScheduler {
    sender: mpsc::UnboundedSender<RevisionId>,
    pending: Arc<Mutex<HashSet<RevisionId>>>,
    stats: Arc<AtomicRebuildStats>,
    worker: JoinHandle<()>,
}

impl RebuildScheduler {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(
        engine: Arc<RwLock<ScriptEngine>>,
        cache: Arc<CompiledCache>,
        notifier: Arc<ChangeNotifier>,
    ) -> Result<Self, ServiceError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ServiceError::NoRuntime(e.to_string()))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(HashSet::new()));
        let stats = Arc::new(AtomicRebuildStats::default());

        let worker = handle.spawn(run_worker(
            receiver,
            Arc::clone(&pending),
            Arc::clone(&stats),
            engine,
            cache,
            notifier,
        ));

        Ok(Self {
            sender,
            pending,
            stats,
            worker,
        })
    }

    /// Queue a rebuild unless one is already pending. Never blocks.
    pub fn schedule(&self, revision: RevisionId) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.insert(revision) {
            return false;
        }
        if self.sender.send(revision).is_err() {
            pending.remove(&revision);
            log::error!("Rebuild worker is gone; revision {revision} not scheduled");
            return false;
        }
        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> RebuildStats {
        RebuildStats {
            scheduled: self.stats.scheduled.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RebuildScheduler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<RevisionId>,
    pending: Arc<Mutex<HashSet<RevisionId>>>,
    stats: Arc<AtomicRebuildStats>,
    engine: Arc<RwLock<ScriptEngine>>,
    cache: Arc<CompiledCache>,
    notifier: Arc<ChangeNotifier>,
) {
    while let Some(revision) = receiver.recv().await {
        pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&revision);

        // Held across compile and store so a concurrent delete cannot
        // interleave with the write.
        let outcome = match engine.read() {
            Ok(engine) => cache.compile(&engine, revision),
            Err(_) => Err(cuebook_core::ScriptError::LockPoisoned.into()),
        };

        match outcome {
            Ok(entry) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "Rebuilt compiled cache of revision {revision} at edit {}",
                    entry.edit_seq
                );
                notifier.notify(ScriptEvent::CompiledReady {
                    revision_id: revision,
                    edit_seq: entry.edit_seq,
                });
            }
            Err(err) if err.is_not_found() => {
                stats.skipped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Skipped rebuild of revision {revision}: {err}");
            }
            Err(err) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("Rebuild of revision {revision} failed: {err}");
            }
        }

        tokio::task::yield_now().await;
    }
}
