//! Line sequence engine.
//!
//! A revision's script is one doubly-linked chain of associations running
//! through every page in order. A page is read by finding its unique start
//! (the line whose predecessor is absent or sits on an earlier page) and
//! walking `next_line_id` until the page number changes.
//!
//! ```text
//!   page 1                 page 2
//! ┌──────┐   ┌──────┐   ┌──────┐   ┌──────┐
//! │  a   │──►│  b   │──►│  c   │──►│  d   │
//! │prev ∅│◄──│      │◄──│start │◄──│      │
//! └──────┘   └──────┘   └──────┘   └──────┘
//! ```
//!
//! Edits splice this chain in place for one revision only. Shared lines are
//! never mutated: an update forks a new line and repoints the edges.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EntityKind, Result, ScriptError};
use crate::ids::{LineId, RevisionId};
use crate::model::{now_millis, Cut, Line, LineAssociation, LineDraft};
use crate::tables::Tables;
use crate::validate::validate_line;

/// One entry of a page edit, in final page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineEdit {
    /// Existing line kept as is.
    Unchanged(LineId),
    /// New line appended after the preceding entry.
    Added(LineDraft),
    /// New line spliced between the preceding entry and its successor.
    Inserted(LineDraft),
    /// Existing line replaced by a fork carrying the new content.
    Updated(LineId, LineDraft),
    /// Existing line removed from this revision.
    Deleted(LineId),
}

impl LineEdit {
    fn existing_id(&self) -> Option<LineId> {
        match self {
            LineEdit::Unchanged(id) | LineEdit::Updated(id, _) | LineEdit::Deleted(id) => Some(*id),
            LineEdit::Added(_) | LineEdit::Inserted(_) => None,
        }
    }

    fn draft(&self) -> Option<&LineDraft> {
        match self {
            LineEdit::Added(draft) | LineEdit::Inserted(draft) | LineEdit::Updated(_, draft) => {
                Some(draft)
            }
            LineEdit::Unchanged(_) | LineEdit::Deleted(_) => None,
        }
    }
}

/// A page as submitted by an editor: every line of the page, in order,
/// each tagged with what happened to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEdit {
    pub entries: Vec<LineEdit>,
}

/// Index-set classification of a submitted page, as sent by editors that
/// keep the page as a flat list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    #[serde(default)]
    pub added: BTreeSet<usize>,
    #[serde(default)]
    pub inserted: BTreeSet<usize>,
    #[serde(default)]
    pub updated: BTreeSet<usize>,
    #[serde(default)]
    pub deleted: BTreeSet<usize>,
}

/// One line of a flat submitted page. `id` is `None` for new lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedLine {
    pub id: Option<LineId>,
    #[serde(flatten)]
    pub draft: LineDraft,
}

impl PageEdit {
    pub fn new(entries: Vec<LineEdit>) -> Self {
        Self { entries }
    }

    /// Build an edit from a flat page plus index sets. Indices in no set are
    /// unchanged lines.
    pub fn from_status(lines: Vec<SubmittedLine>, status: &ChangeStatus) -> Result<Self> {
        let sets = [
            &status.added,
            &status.inserted,
            &status.updated,
            &status.deleted,
        ];
        for (i, set) in sets.iter().enumerate() {
            if let Some(index) = set.iter().find(|index| **index >= lines.len()) {
                return Err(ScriptError::validation(format!(
                    "Change status index {index} is out of range"
                )));
            }
            for other in &sets[i + 1..] {
                if let Some(index) = set.intersection(other).next() {
                    return Err(ScriptError::validation(format!(
                        "Line {index} has more than one change status"
                    )));
                }
            }
        }

        let mut entries = Vec::with_capacity(lines.len());
        for (index, line) in lines.into_iter().enumerate() {
            let entry = if status.added.contains(&index) {
                LineEdit::Added(line.draft)
            } else if status.inserted.contains(&index) {
                LineEdit::Inserted(line.draft)
            } else {
                let id = line.id.ok_or_else(|| {
                    ScriptError::validation(format!("Line {index} has no id"))
                })?;
                if status.updated.contains(&index) {
                    LineEdit::Updated(id, line.draft)
                } else if status.deleted.contains(&index) {
                    LineEdit::Deleted(id)
                } else {
                    LineEdit::Unchanged(id)
                }
            };
            entries.push(entry);
        }
        Ok(Self { entries })
    }
}

/// What an applied page edit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageEditSummary {
    /// Final line ids of the page, in order.
    pub lines: Vec<LineId>,
    pub created: usize,
    pub forked: usize,
    pub deleted: usize,
    pub lines_collected: usize,
}

impl Tables {
    /// Locate the first line of `page`. `None` for an empty page.
    fn page_start(&self, revision: RevisionId, page: u32) -> Result<Option<LineId>> {
        let mut on_page = 0;
        let mut candidates = Vec::new();
        for assoc in self.revision_associations(revision) {
            if self.line(assoc.line_id)?.page != page {
                continue;
            }
            on_page += 1;
            let starts = match assoc.previous_line_id {
                None => true,
                Some(previous) => self.line(previous)?.page < page,
            };
            if starts {
                candidates.push(assoc.line_id);
            }
        }

        match (on_page, candidates.as_slice()) {
            (0, _) => Ok(None),
            (_, [start]) => Ok(Some(*start)),
            (_, found) => Err(ScriptError::PageOrderCorruption {
                revision,
                page,
                candidates: found.len(),
            }),
        }
    }

    /// Locate the last line of `page` without walking the whole page.
    fn page_tail(&self, revision: RevisionId, page: u32) -> Result<Option<LineId>> {
        let mut on_page = 0;
        let mut candidates = Vec::new();
        for assoc in self.revision_associations(revision) {
            if self.line(assoc.line_id)?.page != page {
                continue;
            }
            on_page += 1;
            let ends = match assoc.next_line_id {
                None => true,
                Some(next) => self.line(next)?.page != page,
            };
            if ends {
                candidates.push(assoc.line_id);
            }
        }

        match (on_page, candidates.as_slice()) {
            (0, _) => Ok(None),
            (_, [tail]) => Ok(Some(*tail)),
            (_, found) => Err(ScriptError::PageOrderCorruption {
                revision,
                page,
                candidates: found.len(),
            }),
        }
    }

    /// The first association of the whole chain, i.e. the one without a
    /// predecessor.
    fn chain_head(&self, revision: RevisionId) -> Result<Option<LineId>> {
        let heads: Vec<LineId> = self
            .revision_associations(revision)
            .filter(|assoc| assoc.previous_line_id.is_none())
            .map(|assoc| assoc.line_id)
            .collect();
        match heads.as_slice() {
            [] => Ok(None),
            [head] => Ok(Some(*head)),
            found => {
                let page = self.line(found[0])?.page;
                Err(ScriptError::PageOrderCorruption {
                    revision,
                    page,
                    candidates: found.len(),
                })
            }
        }
    }

    /// Reconstruct the ordered content of one page.
    pub(crate) fn page_lines(&self, revision: RevisionId, page: u32) -> Result<Vec<Arc<Line>>> {
        self.revision(revision)?;
        let Some(start) = self.page_start(revision, page)? else {
            return Ok(Vec::new());
        };

        let limit = self.association_count(revision);
        let mut lines = Vec::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let line = self.line(id)?;
            if line.page != page {
                break;
            }
            if lines.len() >= limit {
                // A cycle inside the page.
                return Err(ScriptError::PageOrderCorruption {
                    revision,
                    page,
                    candidates: 0,
                });
            }
            lines.push(Arc::clone(line));
            cursor = self.require_association(revision, id)?.next_line_id;
        }
        Ok(lines)
    }

    pub(crate) fn max_page(&self, revision: RevisionId) -> Result<u32> {
        self.revision(revision)?;
        let mut max = 0;
        for assoc in self.revision_associations(revision) {
            max = max.max(self.line(assoc.line_id)?.page);
        }
        Ok(max)
    }

    /// Apply a whole-page edit to one revision.
    ///
    /// The caller runs this inside a staged transaction: any error leaves the
    /// committed state untouched.
    pub(crate) fn apply_page_edit(
        &mut self,
        revision: RevisionId,
        page: u32,
        edit: &PageEdit,
    ) -> Result<PageEditSummary> {
        if page == 0 {
            return Err(ScriptError::validation("Pages are numbered from 1"));
        }
        let script_id = self.revision(revision)?.script_id;
        let mode = self.script(script_id)?.mode;

        for (index, entry) in edit.entries.iter().enumerate() {
            if let Some(draft) = entry.draft() {
                validate_line(draft, mode).map_err(|err| match err {
                    ScriptError::Validation(msg) => {
                        ScriptError::Validation(format!("Line {index}: {msg}"))
                    }
                    other => other,
                })?;
                if draft.page != page {
                    return Err(ScriptError::validation(format!(
                        "Line {index} is for page {} but page {page} is being edited",
                        draft.page
                    )));
                }
            }
        }
        self.check_page_coverage(revision, page, edit)?;

        let mut summary = PageEditSummary::default();
        let mut cursor = self.initial_cursor(revision, page, edit)?;
        for entry in &edit.entries {
            match entry {
                LineEdit::Unchanged(id) => {
                    if cursor == Some(*id) {
                        return Err(ScriptError::conflict(format!(
                            "Line {id} cannot be its own previous line"
                        )));
                    }
                    cursor = Some(*id);
                    summary.lines.push(*id);
                }
                LineEdit::Added(draft) | LineEdit::Inserted(draft) => {
                    let id = self.splice_new_line(revision, cursor, draft)?;
                    cursor = Some(id);
                    summary.lines.push(id);
                    summary.created += 1;
                }
                LineEdit::Updated(id, draft) => {
                    let (new_id, collected) = self.fork_line(revision, *id, draft)?;
                    cursor = Some(new_id);
                    summary.lines.push(new_id);
                    summary.forked += 1;
                    summary.lines_collected += collected as usize;
                }
                LineEdit::Deleted(id) => {
                    let collected = self.unlink_line(revision, *id)?;
                    summary.deleted += 1;
                    summary.lines_collected += collected as usize;
                }
            }
        }

        let actual: Vec<LineId> = self
            .page_lines(revision, page)?
            .iter()
            .map(|line| line.id)
            .collect();
        if actual != summary.lines {
            log::error!(
                "Page {page} of revision {revision} did not reconstruct as edited ({} lines expected, {} found)",
                summary.lines.len(),
                actual.len()
            );
            return Err(ScriptError::PageOrderCorruption {
                revision,
                page,
                candidates: actual.len(),
            });
        }

        self.touch_revision(revision)?;
        log::info!(
            "Edited page {page} of revision {revision}: {} created, {} forked, {} deleted",
            summary.created,
            summary.forked,
            summary.deleted
        );
        Ok(summary)
    }

    /// Every line currently on the page must be accounted for exactly once,
    /// in its current order.
    fn check_page_coverage(&self, revision: RevisionId, page: u32, edit: &PageEdit) -> Result<()> {
        let mut seen = HashSet::new();
        let mut named = Vec::new();
        for id in edit.entries.iter().filter_map(LineEdit::existing_id) {
            named.push(id);
            if !seen.insert(id) {
                return Err(ScriptError::conflict(format!(
                    "Line {id} appears more than once in the page edit"
                )));
            }
            let line = self.line(self.require_association(revision, id)?.line_id)?;
            if line.page != page {
                return Err(ScriptError::validation(format!(
                    "Line {id} is on page {}, not page {page}",
                    line.page
                )));
            }
        }

        let current: Vec<LineId> = self
            .page_lines(revision, page)?
            .iter()
            .map(|line| line.id)
            .collect();
        if current.len() != named.len() || current.iter().any(|id| !seen.contains(id)) {
            return Err(ScriptError::validation(format!(
                "Page edit does not match the current content of page {page}; reload the page"
            )));
        }
        // Existing lines cannot be moved; reordering is delete plus insert.
        if current != named {
            return Err(ScriptError::validation(format!(
                "Page edit reorders existing lines of page {page}"
            )));
        }
        Ok(())
    }

    /// The line the first entry of the edit follows.
    fn initial_cursor(
        &self,
        revision: RevisionId,
        page: u32,
        edit: &PageEdit,
    ) -> Result<Option<LineId>> {
        // New lines ahead of the first existing one are spliced in front of it.
        match edit.entries.iter().find_map(LineEdit::existing_id) {
            Some(first) => Ok(self.require_association(revision, first)?.previous_line_id),
            None if page == 1 => Ok(None),
            None => match self.page_tail(revision, page - 1)? {
                Some(tail) => Ok(Some(tail)),
                None => Err(ScriptError::validation(format!(
                    "Previous page {} does not contain any lines",
                    page - 1
                ))),
            },
        }
    }

    /// Create a line from `draft` and link it right after `previous`.
    fn splice_new_line(
        &mut self,
        revision: RevisionId,
        previous: Option<LineId>,
        draft: &LineDraft,
    ) -> Result<LineId> {
        let next = match previous {
            Some(previous) => self.require_association(revision, previous)?.next_line_id,
            None => self.chain_head(revision)?,
        };
        let id = self.insert_line(Line::from_draft(draft));
        self.put_association(LineAssociation {
            revision_id: revision,
            line_id: id,
            next_line_id: next,
            previous_line_id: previous,
        });
        if let Some(previous) = previous {
            self.set_next(revision, previous, Some(id))?;
        }
        if let Some(next) = next {
            self.set_previous(revision, next, Some(id))?;
        }
        Ok(id)
    }

    /// Replace `old` in this revision with a fork built from `draft`.
    ///
    /// Cue associations and cuts of this revision move to the fork before
    /// the old line is collected; sibling revisions keep the old line.
    fn fork_line(
        &mut self,
        revision: RevisionId,
        old: LineId,
        draft: &LineDraft,
    ) -> Result<(LineId, bool)> {
        let old_assoc = self.require_association(revision, old)?.clone();
        let old_line = Arc::clone(self.line(old)?);

        let fork = Line::from_draft(draft);
        let new_parts: BTreeMap<u32, _> = fork
            .parts
            .iter()
            .map(|part| (part.part_index, part.id))
            .collect();
        let new_id = self.insert_line(fork);

        self.remove_association(revision, old);
        self.put_association(LineAssociation {
            revision_id: revision,
            line_id: new_id,
            next_line_id: old_assoc.next_line_id,
            previous_line_id: old_assoc.previous_line_id,
        });
        if let Some(previous) = old_assoc.previous_line_id {
            self.set_next(revision, previous, Some(new_id))?;
        }
        if let Some(next) = old_assoc.next_line_id {
            self.set_previous(revision, next, Some(new_id))?;
        }

        for mut assoc in self.line_cue_associations(revision, old) {
            self.remove_cue_association(&assoc);
            assoc.line_id = new_id;
            self.put_cue_association(assoc);
        }

        for part in &old_line.parts {
            let cut = Cut {
                revision_id: revision,
                line_part_id: part.id,
            };
            if self.remove_cut(&cut) {
                if let Some(new_part) = new_parts.get(&part.part_index) {
                    self.insert_cut(Cut {
                        revision_id: revision,
                        line_part_id: *new_part,
                    });
                }
            }
        }

        let collected = self.collect_line(old);
        Ok((new_id, collected))
    }

    /// Remove `line` from this revision's chain, with its cues and cuts.
    fn unlink_line(&mut self, revision: RevisionId, line: LineId) -> Result<bool> {
        let assoc = self
            .remove_association(revision, line)
            .ok_or_else(|| ScriptError::not_found(EntityKind::Line, line))?;
        if let Some(previous) = assoc.previous_line_id {
            self.set_next(revision, previous, assoc.next_line_id)?;
        }
        if let Some(next) = assoc.next_line_id {
            self.set_previous(revision, next, assoc.previous_line_id)?;
        }

        for cue_assoc in self.line_cue_associations(revision, line) {
            self.remove_cue_association(&cue_assoc);
            self.collect_cue(cue_assoc.cue_id);
        }
        let parts = Arc::clone(self.line(line)?);
        for part in &parts.parts {
            self.remove_cut(&Cut {
                revision_id: revision,
                line_part_id: part.id,
            });
        }

        Ok(self.collect_line(line))
    }

    /// Record a committed content change on the revision.
    pub(crate) fn touch_revision(&mut self, revision: RevisionId) -> Result<()> {
        let rev = self.revision_mut(revision)?;
        rev.edited_at = now_millis().max(rev.edited_at);
        rev.edit_seq += 1;
        Ok(())
    }
}
