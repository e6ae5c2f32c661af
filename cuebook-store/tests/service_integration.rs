//! Service integration tests.
//!
//! Verifies:
//! - Compiled reads are NotReady until the background rebuild lands
//! - Engine state survives closing and reopening the store
//! - Deleting a revision drops its compiled cache entry
//! - Rejected edits leave both memory and disk untouched

use cuebook_store::{
    BlobBackend, CacheLookup, CompiledCache, ScriptEvent, ScriptService, ScriptStore,
    ServiceConfig, StoreConfig,
};
use cuebook_core::{
    CharacterId, CueTypeId, LineDraft, LineEdit, PageEdit, RevisionId, ScriptMode, Speaker,
};

use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn say(page: u32, text: &str) -> LineDraft {
    LineDraft::dialogue(page, Speaker::Character(CharacterId::MIN), text)
}

fn page_text(service: &ScriptService, revision: RevisionId, page: u32) -> Vec<String> {
    service
        .get_page(revision, page)
        .unwrap()
        .iter()
        .map(|line| line.parts[0].text.clone().unwrap_or_default())
        .collect()
}

/// Wait until the compiled cache of `revision` reaches `edit_seq`.
async fn await_compiled(
    events: &mut broadcast::Receiver<ScriptEvent>,
    revision: RevisionId,
    edit_seq: u64,
) {
    timeout(Duration::from_secs(5), async {
        loop {
            if let ScriptEvent::CompiledReady {
                revision_id,
                edit_seq: seq,
            } = events.recv().await.unwrap()
            {
                if revision_id == revision && seq == edit_seq {
                    return;
                }
            }
        }
    })
    .await
    .expect("compiled cache was not rebuilt in time");
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Run `f` on its own runtime so every background task, and every store
/// handle it holds, is gone once it returns.
fn with_runtime<T>(f: impl FnOnce() -> T) -> T {
    let runtime = runtime();
    let _guard = runtime.enter();
    f()
}

fn open_at(path: &Path) -> ScriptService {
    ScriptService::open(ServiceConfig::for_testing(path)).unwrap()
}

// ─── Compiled cache ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_compiled_not_ready_then_ready() {
    init_logging();
    let service = ScriptService::open(ServiceConfig::default()).unwrap();
    let mut events = service.subscribe();

    let script = service.create_script("Twelfth Night", ScriptMode::Full).unwrap();
    let root = service.current_revision(script).unwrap();
    let edit = PageEdit::new(vec![
        LineEdit::Added(say(1, "If music be the food of love, play on")),
        LineEdit::Added(say(1, "Give me excess of it")),
    ]);
    service.apply_page_edit(root, 1, &edit).unwrap();
    let edit_seq = service.revision(root).unwrap().edit_seq;

    // No await since the edit, so the worker has not run.
    assert_eq!(service.get_compiled(root).unwrap(), CacheLookup::NotReady);

    await_compiled(&mut events, root, edit_seq).await;
    let compiled = service.get_compiled(root).unwrap().ready().unwrap();
    let lines: Vec<_> = compiled.pages[&1].iter().map(|c| c.line.clone()).collect();
    assert_eq!(lines, service.get_page(root, 1).unwrap());
    assert_eq!(compiled.edit_seq, edit_seq);
}

#[tokio::test]
async fn test_cue_change_rebuilds_compiled() {
    init_logging();
    let service = ScriptService::open(ServiceConfig::default()).unwrap();
    let mut events = service.subscribe();

    let script = service.create_script("Pericles", ScriptMode::Full).unwrap();
    let root = service.current_revision(script).unwrap();
    let summary = service
        .apply_page_edit(root, 1, &PageEdit::new(vec![LineEdit::Added(say(1, "Enter Gower"))]))
        .unwrap();
    let line = summary.lines[0];

    let cue_type = CueTypeId::new_v4();
    service.add_cue(root, line, cue_type, "LX 1").unwrap();
    let edit_seq = service.revision(root).unwrap().edit_seq;

    await_compiled(&mut events, root, edit_seq).await;
    let compiled = service.get_compiled(root).unwrap().ready().unwrap();
    assert_eq!(compiled.pages[&1][0].cues.len(), 1);
    assert_eq!(compiled.pages[&1][0].cues[0].ident, "LX 1");
    assert_eq!(service.cue_stats(root).unwrap()[&cue_type], 1);
}

#[test]
fn test_delete_revision_removes_compiled_entry() {
    init_logging();
    let dir = tempdir().unwrap();

    let (root, child) = runtime().block_on(async {
        let service = open_at(dir.path());
        let mut events = service.subscribe();

        let script = service.create_script("Cymbeline", ScriptMode::Full).unwrap();
        let root = service.current_revision(script).unwrap();
        let child = service.create_revision(script, None, "Cuts", false).unwrap();
        await_compiled(&mut events, child, 0).await;
        assert!(service.get_compiled(child).unwrap().is_ready());

        let deletion = service.delete_revision(child).unwrap();
        assert!(!deletion.current_changed);
        assert!(service.get_compiled(child).unwrap_err().is_not_found());
        (root, child)
    });

    let store = ScriptStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    assert!(store.entry(child).unwrap().is_none());
    assert!(store.entry(root).unwrap().is_some());
}

#[tokio::test]
async fn test_deleting_current_revision_announces_fallback() {
    init_logging();
    let service = ScriptService::open(ServiceConfig::default()).unwrap();
    let script = service.create_script("Measure for Measure", ScriptMode::Full).unwrap();
    let root = service.current_revision(script).unwrap();
    let child = service.create_revision(script, Some(root), "Touring", true).unwrap();

    let mut events = service.subscribe();
    service.delete_revision(child).unwrap();

    let mut saw_fallback = false;
    while let Ok(event) = events.try_recv() {
        if event
            == (ScriptEvent::CurrentRevisionChanged {
                script_id: script,
                revision_id: Some(root),
            })
        {
            saw_fallback = true;
        }
    }
    assert!(saw_fallback);
    assert_eq!(service.current_revision(script).unwrap(), root);
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[test]
fn test_state_survives_reopen() {
    init_logging();
    let dir = tempdir().unwrap();

    let (script, root, branch) = with_runtime(|| {
        let service = open_at(dir.path());
        assert!(service.is_persistent());
        let script = service.create_script("The Tempest", ScriptMode::Full).unwrap();
        let root = service.current_revision(script).unwrap();
        service
            .apply_page_edit(
                root,
                1,
                &PageEdit::new(vec![
                    LineEdit::Added(LineDraft::stage_direction(1, "A tempestuous noise")),
                    LineEdit::Added(say(1, "Boatswain!")),
                ]),
            )
            .unwrap();
        let branch = service.create_revision(script, None, "Storm cut", true).unwrap();
        let page = service.get_page(branch, 1).unwrap();
        let edit = PageEdit::new(vec![
            LineEdit::Deleted(page[0].id),
            LineEdit::Unchanged(page[1].id),
        ]);
        service.apply_page_edit(branch, 1, &edit).unwrap();
        service.sync().unwrap();
        (script, root, branch)
    });

    with_runtime(|| {
        let service = open_at(dir.path());
        assert_eq!(service.script(script).unwrap().name, "The Tempest");
        assert_eq!(service.current_revision(script).unwrap(), branch);
        assert_eq!(page_text(&service, root, 1), vec!["A tempestuous noise", "Boatswain!"]);
        assert_eq!(page_text(&service, branch, 1), vec!["Boatswain!"]);
        assert_eq!(service.revision_tree(script).unwrap(), vec![vec![root, branch]]);
    });
}

#[test]
fn test_rejected_edit_is_not_persisted() {
    init_logging();
    let dir = tempdir().unwrap();

    let (root, before) = with_runtime(|| {
        let service = open_at(dir.path());
        let script = service.create_script("King John", ScriptMode::Full).unwrap();
        let root = service.current_revision(script).unwrap();
        let edit = PageEdit::new(vec![LineEdit::Added(say(1, "Now, say, Chatillon"))]);
        service.apply_page_edit(root, 1, &edit).unwrap();
        let before = service.revision(root).unwrap();

        // A line claiming the wrong page is rejected as a whole.
        let bad = PageEdit::new(vec![
            LineEdit::Unchanged(service.get_page(root, 1).unwrap()[0].id),
            LineEdit::Added(say(1, "Thus, after greeting")),
            LineEdit::Added(say(2, "speaks the King of France")),
        ]);
        assert!(service.apply_page_edit(root, 1, &bad).is_err());
        assert_eq!(page_text(&service, root, 1), vec!["Now, say, Chatillon"]);
        assert_eq!(service.revision(root).unwrap(), before);
        (root, before)
    });

    with_runtime(|| {
        let service = open_at(dir.path());
        assert_eq!(page_text(&service, root, 1), vec!["Now, say, Chatillon"]);
        assert_eq!(service.revision(root).unwrap().edit_seq, before.edit_seq);
    });
}

#[test]
fn test_stale_cache_entry_after_reopen() {
    init_logging();
    let dir = tempdir().unwrap();

    let root = runtime().block_on(async {
        let service = open_at(dir.path());
        let mut events = service.subscribe();
        let script = service.create_script("Richard II", ScriptMode::Full).unwrap();
        let root = service.current_revision(script).unwrap();
        await_compiled(&mut events, root, 0).await;
        root
    });

    with_runtime(|| {
        let service = open_at(dir.path());
        assert!(service.get_compiled(root).unwrap().is_ready());

        let edit = PageEdit::new(vec![LineEdit::Added(say(1, "Old John of Gaunt"))]);
        service.apply_page_edit(root, 1, &edit).unwrap();
        assert_eq!(service.get_compiled(root).unwrap(), CacheLookup::NotReady);
        assert!(service.rebuild_stats().scheduled >= 1);
    });
}

#[test]
fn test_open_prunes_entries_of_unknown_revisions() {
    init_logging();
    let dir = tempdir().unwrap();
    let stray = RevisionId::new_v4();

    {
        let store = Arc::new(ScriptStore::open(StoreConfig::for_testing(dir.path())).unwrap());
        let cache = CompiledCache::new(store.clone());
        let mut engine = cuebook_core::ScriptEngine::new();
        let script = engine.create_script("Stray", ScriptMode::Full).unwrap();
        let mut compiled = engine.compile(engine.current_revision(script).unwrap()).unwrap();
        compiled.revision_id = stray;
        cache.store(&compiled).unwrap();
        assert!(store.entry(stray).unwrap().is_some());
    }

    with_runtime(|| {
        let service = open_at(dir.path());
        assert!(service.scripts().unwrap().is_empty());
    });

    let store = ScriptStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    assert!(store.entry(stray).unwrap().is_none());
}
