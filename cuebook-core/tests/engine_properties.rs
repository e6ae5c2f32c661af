//! Engine-level behaviour through the public API only.
//!
//! Verifies:
//! - Page round trip and chain links
//! - Branch isolation and copy-on-write forks
//! - Orphan collection of unreferenced lines, parts and cues
//! - Revision tree reparenting and the protected root
//! - Cut cascades on line deletion

use cuebook_core::{
    CharacterId, CueTypeId, LineDraft, LineEdit, LineId, PageEdit, RevisionId, ScriptEngine,
    ScriptError, ScriptId, ScriptMode, Speaker,
};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn new_script(engine: &mut ScriptEngine) -> (ScriptId, RevisionId) {
    let script = engine.create_script("The Winter's Tale", ScriptMode::Full).unwrap();
    let root = engine.current_revision(script).unwrap();
    (script, root)
}

fn say(page: u32, text: &str) -> LineDraft {
    LineDraft::dialogue(page, Speaker::Character(CharacterId::MIN), text)
}

fn append(engine: &mut ScriptEngine, revision: RevisionId, page: u32, texts: &[&str]) -> Vec<LineId> {
    let mut entries: Vec<LineEdit> = engine
        .get_page(revision, page)
        .unwrap()
        .iter()
        .map(|line| LineEdit::Unchanged(line.id))
        .collect();
    let existing = entries.len();
    entries.extend(texts.iter().map(|text| LineEdit::Added(say(page, text))));
    let summary = engine
        .apply_page_edit(revision, page, &PageEdit::new(entries))
        .unwrap();
    summary.lines[existing..].to_vec()
}

fn page_text(engine: &ScriptEngine, revision: RevisionId, page: u32) -> Vec<String> {
    engine
        .get_page(revision, page)
        .unwrap()
        .iter()
        .map(|line| line.parts[0].text.clone().unwrap_or_default())
        .collect()
}

fn page_ids(engine: &ScriptEngine, revision: RevisionId, page: u32) -> Vec<LineId> {
    engine
        .get_page(revision, page)
        .unwrap()
        .iter()
        .map(|line| line.id)
        .collect()
}

// ─── Line sequence ───────────────────────────────────────────────────────────

#[test]
fn test_page_round_trip_preserves_order() {
    let mut engine = ScriptEngine::new();
    let (_, root) = new_script(&mut engine);
    let texts: Vec<String> = (0..25).map(|i| format!("line {i}")).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

    let ids = append(&mut engine, root, 1, &refs);

    assert_eq!(page_ids(&engine, root, 1), ids);
    assert_eq!(page_text(&engine, root, 1), texts);
}

#[test]
fn test_new_script_scenario() {
    let mut engine = ScriptEngine::new();
    let (_, root) = new_script(&mut engine);
    assert!(engine.get_page(root, 1).unwrap().is_empty());
    assert_eq!(engine.get_max_page(root).unwrap(), 0);

    let ids = append(&mut engine, root, 1, &["Exit, pursued by a bear.", "Well."]);
    let page = engine.get_page(root, 1).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, ids[0]);
    assert_eq!(
        engine.association(root, ids[0]).unwrap().next_line_id,
        Some(ids[1])
    );
    assert_eq!(
        engine.association(root, ids[1]).unwrap().previous_line_id,
        Some(ids[0])
    );
}

#[test]
fn test_multi_page_edit_in_middle() {
    let mut engine = ScriptEngine::new();
    let (_, root) = new_script(&mut engine);
    append(&mut engine, root, 1, &["a", "b"]);
    let p2 = append(&mut engine, root, 2, &["c", "d", "e"]);
    append(&mut engine, root, 3, &["f"]);

    let edit = PageEdit::new(vec![
        LineEdit::Updated(p2[0], say(2, "C")),
        LineEdit::Deleted(p2[1]),
        LineEdit::Unchanged(p2[2]),
        LineEdit::Added(say(2, "e2")),
    ]);
    engine.apply_page_edit(root, 2, &edit).unwrap();

    assert_eq!(page_text(&engine, root, 1), ["a", "b"]);
    assert_eq!(page_text(&engine, root, 2), ["C", "e", "e2"]);
    assert_eq!(page_text(&engine, root, 3), ["f"]);
    assert_eq!(engine.get_max_page(root).unwrap(), 3);
}

// ─── Revisions ───────────────────────────────────────────────────────────────

#[test]
fn test_branch_isolation() {
    let mut engine = ScriptEngine::new();
    let (script, root) = new_script(&mut engine);
    let ids = append(&mut engine, root, 1, &["one", "two"]);

    let branch = engine
        .create_revision(script, Some(root), "Director's cut", false)
        .unwrap();
    assert_eq!(engine.current_revision(script).unwrap(), root);
    assert_eq!(engine.association_count(branch), engine.association_count(root));
    assert_eq!(page_ids(&engine, branch, 1), ids);

    append(&mut engine, root, 1, &["three"]);
    append(&mut engine, root, 2, &["four"]);
    assert_eq!(engine.association_count(branch), 2);
    assert_eq!(page_text(&engine, branch, 1), ["one", "two"]);

    append(&mut engine, branch, 1, &["other"]);
    assert_eq!(engine.get_max_page(root).unwrap(), 2);
    assert_eq!(page_text(&engine, root, 1), ["one", "two", "three"]);
}

#[test]
fn test_copy_on_write_update() {
    let mut engine = ScriptEngine::new();
    let (script, root) = new_script(&mut engine);
    let ids = append(&mut engine, root, 1, &["Is this a dagger"]);
    let sibling = engine.create_revision(script, Some(root), "sibling", false).unwrap();

    let edit = PageEdit::new(vec![LineEdit::Updated(ids[0], say(1, "Is this a dagger which I see"))]);
    let summary = engine.apply_page_edit(root, 1, &edit).unwrap();

    assert_ne!(summary.lines[0], ids[0]);
    assert_eq!(summary.lines_collected, 0);
    assert!(engine.contains_line(ids[0]));
    assert_eq!(page_text(&engine, sibling, 1), ["Is this a dagger"]);
    assert_eq!(page_text(&engine, root, 1), ["Is this a dagger which I see"]);
}

#[test]
fn test_tree_reparenting() {
    let mut engine = ScriptEngine::new();
    let (script, a) = new_script(&mut engine);
    let b = engine.create_revision(script, Some(a), "B", false).unwrap();
    let c = engine.create_revision(script, Some(b), "C", false).unwrap();
    let d = engine.create_revision(script, Some(b), "D", false).unwrap();

    engine.delete_revision(b).unwrap();

    assert_eq!(engine.revision(c).unwrap().parent_revision_id, Some(a));
    assert_eq!(engine.revision(d).unwrap().parent_revision_id, Some(a));
    assert!(matches!(
        engine.revision(b),
        Err(ScriptError::NotFound { .. })
    ));
}

#[test]
fn test_protected_root() {
    let mut engine = ScriptEngine::new();
    let (script, root) = new_script(&mut engine);
    append(&mut engine, root, 1, &["Now is the winter"]);
    let child = engine.create_revision(script, None, "child", true).unwrap();
    let before = engine.snapshot();

    assert!(matches!(
        engine.delete_revision(root),
        Err(ScriptError::Conflict(_))
    ));
    assert_eq!(engine.line_count(), before.lines.len());
    assert_eq!(engine.current_revision(script).unwrap(), child);
    assert_eq!(engine.revisions(script).unwrap().len(), 2);
}

// ─── Orphan collection ───────────────────────────────────────────────────────

#[test]
fn test_deleted_line_is_collected() {
    let mut engine = ScriptEngine::new();
    let (_, root) = new_script(&mut engine);
    let ids = append(&mut engine, root, 1, &["gone", "kept"]);
    let cue = engine
        .add_cue(root, ids[0], CueTypeId::new_v4(), "LX 12")
        .unwrap();

    let edit = PageEdit::new(vec![LineEdit::Deleted(ids[0]), LineEdit::Unchanged(ids[1])]);
    let summary = engine.apply_page_edit(root, 1, &edit).unwrap();

    assert_eq!(summary.lines_collected, 1);
    assert!(!engine.contains_line(ids[0]));
    assert!(!engine.contains_cue(cue));
    assert_eq!(engine.line_count(), 1);
    assert_eq!(engine.sweep().lines_collected, 0);
}

#[test]
fn test_shared_line_survives_until_last_revision_drops_it() {
    let mut engine = ScriptEngine::new();
    let (script, root) = new_script(&mut engine);
    let ids = append(&mut engine, root, 1, &["shared"]);
    let branch = engine.create_revision(script, Some(root), "branch", false).unwrap();

    engine
        .apply_page_edit(root, 1, &PageEdit::new(vec![LineEdit::Deleted(ids[0])]))
        .unwrap();
    assert!(engine.contains_line(ids[0]));

    engine.delete_revision(branch).unwrap();
    assert!(!engine.contains_line(ids[0]));
    assert_eq!(engine.line_count(), 0);
}

// ─── Cuts ────────────────────────────────────────────────────────────────────

#[test]
fn test_cut_cascades_on_delete() {
    let mut engine = ScriptEngine::new();
    let (_, root) = new_script(&mut engine);
    let ids = append(&mut engine, root, 1, &["struck", "kept"]);
    let part = engine.line(ids[0]).unwrap().parts[0].id;

    engine.set_cuts(root, &[part]).unwrap();
    assert_eq!(engine.get_cuts(root).unwrap(), vec![part]);

    let edit = PageEdit::new(vec![LineEdit::Deleted(ids[0]), LineEdit::Unchanged(ids[1])]);
    engine.apply_page_edit(root, 1, &edit).unwrap();
    assert!(engine.get_cuts(root).unwrap().is_empty());
}

#[test]
fn test_cut_follows_forked_part() {
    let mut engine = ScriptEngine::new();
    let (_, root) = new_script(&mut engine);
    let ids = append(&mut engine, root, 1, &["old words"]);
    let part = engine.line(ids[0]).unwrap().parts[0].id;
    engine.set_cuts(root, &[part]).unwrap();

    let edit = PageEdit::new(vec![LineEdit::Updated(ids[0], say(1, "new words"))]);
    let fork = engine.apply_page_edit(root, 1, &edit).unwrap().lines[0];
    let new_part = engine.line(fork).unwrap().parts[0].id;
    assert_eq!(engine.get_cuts(root).unwrap(), vec![new_part]);
}

#[test]
fn test_compiled_matches_pages() {
    let mut engine = ScriptEngine::new();
    let (_, root) = new_script(&mut engine);
    append(&mut engine, root, 1, &["a", "b"]);
    append(&mut engine, root, 2, &["c"]);

    let compiled = engine.compile(root).unwrap();
    for page in 1..=compiled.max_page {
        let compiled_ids: Vec<LineId> = compiled.pages[&page].iter().map(|l| l.line.id).collect();
        assert_eq!(compiled_ids, page_ids(&engine, root, page));
    }
}
