//! Public entry point of the content engine.
//!
//! Every mutation runs against a staged copy of the tables and is committed
//! by swapping the copy in, so a failed operation leaves no trace.

use std::collections::BTreeMap;

use crate::compiled::CompiledScript;
use crate::error::Result;
use crate::ids::{CueId, CueTypeId, LineId, LinePartId, RevisionId, ScriptId};
use crate::model::{Cue, Line, LineAssociation, Revision, Script, ScriptMode};
use crate::orphan::SweepStats;
use crate::revision::RevisionDeletion;
use crate::sequence::{PageEdit, PageEditSummary};
use crate::tables::{EngineSnapshot, Tables};

#[derive(Debug, Clone, Default)]
pub struct ScriptEngine {
    tables: Tables,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore an engine from a persisted snapshot, rebuilding all indexes.
    pub fn from_snapshot(snapshot: EngineSnapshot) -> Self {
        Self {
            tables: Tables::from_snapshot(snapshot),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.tables.to_snapshot()
    }

    fn transact<T>(&mut self, op: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut staged = self.tables.clone();
        let out = op(&mut staged)?;
        self.tables = staged;
        Ok(out)
    }

    // ─── Scripts & revisions ─────────────────────────────────────────

    /// Create a script and its root revision. The root becomes current.
    pub fn create_script(&mut self, name: &str, mode: ScriptMode) -> Result<ScriptId> {
        self.transact(|t| t.create_script(name, mode).map(|(script, _)| script))
    }

    pub fn script(&self, id: ScriptId) -> Result<Script> {
        self.tables.script(id).cloned()
    }

    pub fn scripts(&self) -> Vec<Script> {
        let mut scripts: Vec<Script> = self.tables.scripts.values().cloned().collect();
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        scripts
    }

    pub fn revision(&self, id: RevisionId) -> Result<Revision> {
        self.tables.revision(id).cloned()
    }

    /// Revisions of a script ordered by revision number.
    pub fn revisions(&self, script: ScriptId) -> Result<Vec<Revision>> {
        self.tables.script(script)?;
        Ok(self
            .tables
            .script_revisions(script)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn revision_tree(&self, script: ScriptId) -> Result<Vec<Vec<RevisionId>>> {
        self.tables.revision_tree(script)
    }

    pub fn current_revision(&self, script: ScriptId) -> Result<RevisionId> {
        self.tables.current_revision(script)
    }

    /// Branch off `parent`, or off the current revision when `None`.
    pub fn create_revision(
        &mut self,
        script: ScriptId,
        parent: Option<RevisionId>,
        description: &str,
        set_as_current: bool,
    ) -> Result<RevisionId> {
        self.transact(|t| t.create_revision(script, parent, description, set_as_current))
    }

    pub fn delete_revision(&mut self, revision: RevisionId) -> Result<RevisionDeletion> {
        self.transact(|t| t.delete_revision(revision))
    }

    pub fn set_current_revision(&mut self, script: ScriptId, revision: RevisionId) -> Result<()> {
        self.transact(|t| t.set_current_revision(script, revision))
    }

    // ─── Pages ───────────────────────────────────────────────────────

    pub fn get_page(&self, revision: RevisionId, page: u32) -> Result<Vec<Line>> {
        Ok(self
            .tables
            .page_lines(revision, page)?
            .into_iter()
            .map(|line| line.as_ref().clone())
            .collect())
    }

    pub fn get_max_page(&self, revision: RevisionId) -> Result<u32> {
        self.tables.max_page(revision)
    }

    pub fn apply_page_edit(
        &mut self,
        revision: RevisionId,
        page: u32,
        edit: &PageEdit,
    ) -> Result<PageEditSummary> {
        self.transact(|t| t.apply_page_edit(revision, page, edit))
    }

    // ─── Cuts & cues ─────────────────────────────────────────────────

    pub fn set_cuts(&mut self, revision: RevisionId, parts: &[LinePartId]) -> Result<()> {
        self.transact(|t| t.set_cuts(revision, parts))
    }

    pub fn get_cuts(&self, revision: RevisionId) -> Result<Vec<LinePartId>> {
        self.tables.cuts(revision)
    }

    pub fn add_cue(
        &mut self,
        revision: RevisionId,
        line: LineId,
        cue_type: CueTypeId,
        ident: &str,
    ) -> Result<CueId> {
        self.transact(|t| t.add_cue(revision, line, cue_type, ident))
    }

    pub fn update_cue(
        &mut self,
        revision: RevisionId,
        line: LineId,
        cue: CueId,
        cue_type: CueTypeId,
        ident: &str,
    ) -> Result<CueId> {
        self.transact(|t| t.update_cue(revision, line, cue, cue_type, ident))
    }

    /// Returns whether the cue itself was deleted.
    pub fn remove_cue(&mut self, revision: RevisionId, line: LineId, cue: CueId) -> Result<bool> {
        self.transact(|t| t.remove_cue(revision, line, cue))
    }

    pub fn cues(&self, revision: RevisionId) -> Result<BTreeMap<LineId, Vec<Cue>>> {
        self.tables.revision_cues(revision)
    }

    pub fn cue_stats(&self, revision: RevisionId) -> Result<BTreeMap<CueTypeId, usize>> {
        self.tables.cue_stats(revision)
    }

    // ─── Derived views ───────────────────────────────────────────────

    pub fn compile(&self, revision: RevisionId) -> Result<CompiledScript> {
        self.tables.compile_snapshot(revision)
    }

    /// Collect every line and cue no revision references.
    pub fn sweep(&mut self) -> SweepStats {
        let stats = self.tables.sweep();
        if stats.lines_collected + stats.cues_collected > 0 {
            log::warn!(
                "Sweep collected {} stray lines and {} stray cues",
                stats.lines_collected,
                stats.cues_collected
            );
        }
        stats
    }

    // ─── Introspection ───────────────────────────────────────────────

    pub fn line(&self, id: LineId) -> Result<Line> {
        self.tables.line(id).map(|line| line.as_ref().clone())
    }

    pub fn contains_line(&self, id: LineId) -> bool {
        self.tables.lines.contains_key(&id)
    }

    pub fn contains_cue(&self, id: CueId) -> bool {
        self.tables.cues.contains_key(&id)
    }

    pub fn association(&self, revision: RevisionId, line: LineId) -> Option<LineAssociation> {
        self.tables.association(revision, line).cloned()
    }

    pub fn association_count(&self, revision: RevisionId) -> usize {
        self.tables.association_count(revision)
    }

    pub fn line_count(&self) -> usize {
        self.tables.line_count()
    }

    pub fn cue_count(&self) -> usize {
        self.tables.cue_count()
    }
}
