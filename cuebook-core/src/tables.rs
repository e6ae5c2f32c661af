//! Content store and association layer.
//!
//! ```text
//! ┌──────────────── revision-scoped edges ────────────────┐
//! │ associations      (rev, line) → prev / next           │
//! │ cue_associations  (rev, line, cue)                    │
//! │ cuts              (rev, part)                         │
//! └───────────┬───────────────────────────────────────────┘
//!             │ reference counts (line_refs / cue_refs)
//!             ▼
//! ┌──────────────── shared content ───────────────────────┐
//! │ lines: LineId → Arc<Line> (parts inline)              │
//! │ cues:  CueId  → Cue                                   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Every edge insert/remove goes through this module so that the reference
//! counts the orphan collector reads can never drift from the edge tables.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EntityKind, Result, ScriptError};
use crate::ids::{CueId, LineId, LinePartId, RevisionId, ScriptId};
use crate::model::{Cue, CueAssociation, Cut, Line, LineAssociation, Revision, Script};

/// All engine state. Cloned wholesale to stage a transaction.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) scripts: HashMap<ScriptId, Script>,
    pub(crate) revisions: HashMap<RevisionId, Revision>,
    pub(crate) lines: HashMap<LineId, Arc<Line>>,
    pub(crate) cues: HashMap<CueId, Cue>,
    associations: BTreeMap<(RevisionId, LineId), LineAssociation>,
    cue_associations: BTreeSet<CueAssociation>,
    cuts: BTreeSet<Cut>,
    /// Part → owning line.
    part_owner: HashMap<LinePartId, LineId>,
    /// Association mentions per line: as `line_id`, `next_line_id` or
    /// `previous_line_id`.
    line_refs: HashMap<LineId, u32>,
    /// Cue association count per cue.
    cue_refs: HashMap<CueId, u32>,
}

/// Serializable form of [`Tables`]. Derived indexes are rebuilt on restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub scripts: Vec<Script>,
    pub revisions: Vec<Revision>,
    pub lines: Vec<Line>,
    pub cues: Vec<Cue>,
    pub associations: Vec<LineAssociation>,
    pub cue_associations: Vec<CueAssociation>,
    pub cuts: Vec<Cut>,
}

impl Tables {
    pub(crate) fn from_snapshot(snapshot: EngineSnapshot) -> Self {
        let mut tables = Tables::default();
        for script in snapshot.scripts {
            tables.scripts.insert(script.id, script);
        }
        for revision in snapshot.revisions {
            tables.revisions.insert(revision.id, revision);
        }
        for line in snapshot.lines {
            tables.insert_line(line);
        }
        for cue in snapshot.cues {
            tables.cues.insert(cue.id, cue);
        }
        for assoc in snapshot.associations {
            tables.put_association(assoc);
        }
        for assoc in snapshot.cue_associations {
            tables.put_cue_association(assoc);
        }
        tables.cuts.extend(snapshot.cuts);
        tables
    }

    pub(crate) fn to_snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            scripts: self.scripts.values().cloned().collect(),
            revisions: self.revisions.values().cloned().collect(),
            lines: self.lines.values().map(|line| line.as_ref().clone()).collect(),
            cues: self.cues.values().cloned().collect(),
            associations: self.associations.values().cloned().collect(),
            cue_associations: self.cue_associations.iter().copied().collect(),
            cuts: self.cuts.iter().copied().collect(),
        }
    }

    // ─── Lookups ─────────────────────────────────────────────────────

    pub(crate) fn script(&self, id: ScriptId) -> Result<&Script> {
        self.scripts
            .get(&id)
            .ok_or_else(|| ScriptError::not_found(EntityKind::Script, id))
    }

    pub(crate) fn script_mut(&mut self, id: ScriptId) -> Result<&mut Script> {
        self.scripts
            .get_mut(&id)
            .ok_or_else(|| ScriptError::not_found(EntityKind::Script, id))
    }

    pub(crate) fn revision(&self, id: RevisionId) -> Result<&Revision> {
        self.revisions
            .get(&id)
            .ok_or_else(|| ScriptError::not_found(EntityKind::Revision, id))
    }

    pub(crate) fn revision_mut(&mut self, id: RevisionId) -> Result<&mut Revision> {
        self.revisions
            .get_mut(&id)
            .ok_or_else(|| ScriptError::not_found(EntityKind::Revision, id))
    }

    pub(crate) fn line(&self, id: LineId) -> Result<&Arc<Line>> {
        self.lines
            .get(&id)
            .ok_or_else(|| ScriptError::not_found(EntityKind::Line, id))
    }

    pub(crate) fn cue(&self, id: CueId) -> Result<&Cue> {
        self.cues
            .get(&id)
            .ok_or_else(|| ScriptError::not_found(EntityKind::Cue, id))
    }

    pub(crate) fn part_owner(&self, part: LinePartId) -> Option<LineId> {
        self.part_owner.get(&part).copied()
    }

    // ─── Content ─────────────────────────────────────────────────────

    pub(crate) fn insert_line(&mut self, line: Line) -> LineId {
        let id = line.id;
        for part in &line.parts {
            self.part_owner.insert(part.id, id);
        }
        self.lines.insert(id, Arc::new(line));
        id
    }

    /// Drop a line and its part index entries. Edges are the caller's job.
    pub(crate) fn remove_line(&mut self, id: LineId) -> Option<Arc<Line>> {
        let line = self.lines.remove(&id)?;
        for part in &line.parts {
            self.part_owner.remove(&part.id);
        }
        Some(line)
    }

    // ─── Line associations ───────────────────────────────────────────

    pub(crate) fn association(&self, revision: RevisionId, line: LineId) -> Option<&LineAssociation> {
        self.associations.get(&(revision, line))
    }

    pub(crate) fn require_association(
        &self,
        revision: RevisionId,
        line: LineId,
    ) -> Result<&LineAssociation> {
        self.association(revision, line)
            .ok_or_else(|| ScriptError::not_found(EntityKind::Line, line))
    }

    /// All associations of one revision, ordered by line id.
    pub(crate) fn revision_associations(
        &self,
        revision: RevisionId,
    ) -> impl Iterator<Item = &LineAssociation> {
        self.associations
            .range((revision, LineId::MIN)..=(revision, LineId::MAX))
            .map(|(_, assoc)| assoc)
    }

    pub(crate) fn association_count(&self, revision: RevisionId) -> usize {
        self.revision_associations(revision).count()
    }

    /// Insert or replace an association, keeping reference counts exact.
    pub(crate) fn put_association(&mut self, assoc: LineAssociation) {
        let key = (assoc.revision_id, assoc.line_id);
        self.add_line_refs(&assoc);
        if let Some(old) = self.associations.insert(key, assoc) {
            self.drop_line_refs(&old);
        }
    }

    pub(crate) fn remove_association(
        &mut self,
        revision: RevisionId,
        line: LineId,
    ) -> Option<LineAssociation> {
        let removed = self.associations.remove(&(revision, line))?;
        self.drop_line_refs(&removed);
        Some(removed)
    }

    /// Repoint `line`'s successor within `revision`.
    pub(crate) fn set_next(
        &mut self,
        revision: RevisionId,
        line: LineId,
        next: Option<LineId>,
    ) -> Result<()> {
        if next == Some(line) {
            return Err(ScriptError::conflict(format!(
                "Line {line} cannot follow itself"
            )));
        }
        let mut assoc = self.require_association(revision, line)?.clone();
        assoc.next_line_id = next;
        self.put_association(assoc);
        Ok(())
    }

    /// Repoint `line`'s predecessor within `revision`.
    pub(crate) fn set_previous(
        &mut self,
        revision: RevisionId,
        line: LineId,
        previous: Option<LineId>,
    ) -> Result<()> {
        if previous == Some(line) {
            return Err(ScriptError::conflict(format!(
                "Line {line} cannot be its own previous line"
            )));
        }
        let mut assoc = self.require_association(revision, line)?.clone();
        assoc.previous_line_id = previous;
        self.put_association(assoc);
        Ok(())
    }

    pub(crate) fn line_ref_count(&self, line: LineId) -> u32 {
        self.line_refs.get(&line).copied().unwrap_or(0)
    }

    fn add_line_refs(&mut self, assoc: &LineAssociation) {
        for id in mentions(assoc) {
            *self.line_refs.entry(id).or_insert(0) += 1;
        }
    }

    fn drop_line_refs(&mut self, assoc: &LineAssociation) {
        for id in mentions(assoc) {
            if let Some(count) = self.line_refs.get_mut(&id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.line_refs.remove(&id);
                }
            }
        }
    }

    // ─── Cue associations ────────────────────────────────────────────

    pub(crate) fn put_cue_association(&mut self, assoc: CueAssociation) -> bool {
        let inserted = self.cue_associations.insert(assoc);
        if inserted {
            *self.cue_refs.entry(assoc.cue_id).or_insert(0) += 1;
        }
        inserted
    }

    pub(crate) fn remove_cue_association(&mut self, assoc: &CueAssociation) -> bool {
        let removed = self.cue_associations.remove(assoc);
        if removed {
            if let Some(count) = self.cue_refs.get_mut(&assoc.cue_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.cue_refs.remove(&assoc.cue_id);
                }
            }
        }
        removed
    }

    pub(crate) fn has_cue_association(&self, assoc: &CueAssociation) -> bool {
        self.cue_associations.contains(assoc)
    }

    pub(crate) fn revision_cue_associations(
        &self,
        revision: RevisionId,
    ) -> impl Iterator<Item = &CueAssociation> {
        self.cue_associations.range(
            CueAssociation {
                revision_id: revision,
                line_id: LineId::MIN,
                cue_id: CueId::MIN,
            }..=CueAssociation {
                revision_id: revision,
                line_id: LineId::MAX,
                cue_id: CueId::MAX,
            },
        )
    }

    /// Cue associations of one line within one revision.
    pub(crate) fn line_cue_associations(
        &self,
        revision: RevisionId,
        line: LineId,
    ) -> Vec<CueAssociation> {
        self.cue_associations
            .range(
                CueAssociation {
                    revision_id: revision,
                    line_id: line,
                    cue_id: CueId::MIN,
                }..=CueAssociation {
                    revision_id: revision,
                    line_id: line,
                    cue_id: CueId::MAX,
                },
            )
            .copied()
            .collect()
    }

    /// Cue associations on `line` in any revision.
    pub(crate) fn cue_associations_on_line(&self, line: LineId) -> Vec<CueAssociation> {
        self.cue_associations
            .iter()
            .filter(|assoc| assoc.line_id == line)
            .copied()
            .collect()
    }

    pub(crate) fn cue_ref_count(&self, cue: CueId) -> u32 {
        self.cue_refs.get(&cue).copied().unwrap_or(0)
    }

    // ─── Cuts ────────────────────────────────────────────────────────

    pub(crate) fn insert_cut(&mut self, cut: Cut) -> bool {
        self.cuts.insert(cut)
    }

    pub(crate) fn remove_cut(&mut self, cut: &Cut) -> bool {
        self.cuts.remove(cut)
    }

    pub(crate) fn has_cut(&self, cut: &Cut) -> bool {
        self.cuts.contains(cut)
    }

    pub(crate) fn revision_cuts(&self, revision: RevisionId) -> impl Iterator<Item = &Cut> {
        self.cuts.range(
            Cut {
                revision_id: revision,
                line_part_id: LinePartId::MIN,
            }..=Cut {
                revision_id: revision,
                line_part_id: LinePartId::MAX,
            },
        )
    }

    /// Remove every cut on the given parts, in all revisions.
    pub(crate) fn purge_cuts_on_parts(&mut self, parts: &[LinePartId]) -> usize {
        let before = self.cuts.len();
        self.cuts.retain(|cut| !parts.contains(&cut.line_part_id));
        before - self.cuts.len()
    }

    // ─── Counters ────────────────────────────────────────────────────

    pub(crate) fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub(crate) fn cue_count(&self) -> usize {
        self.cues.len()
    }

    pub(crate) fn line_ids(&self) -> Vec<LineId> {
        self.lines.keys().copied().collect()
    }

    pub(crate) fn cue_ids(&self) -> Vec<CueId> {
        self.cues.keys().copied().collect()
    }
}

fn mentions(assoc: &LineAssociation) -> impl Iterator<Item = LineId> {
    std::iter::once(assoc.line_id)
        .chain(assoc.next_line_id)
        .chain(assoc.previous_line_id)
}
