//! Cue and cut bookkeeping.
//!
//! Cues follow the same copy-on-write rule as lines: a cue shared by several
//! revisions is forked on update rather than edited in place.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EntityKind, Result, ScriptError};
use crate::ids::{CueId, CueTypeId, LineId, LinePartId, RevisionId};
use crate::model::{Cue, CueAssociation, Cut, LineType};
use crate::tables::Tables;

impl Tables {
    fn check_cue_target(&self, revision: RevisionId, line: LineId, ident: &str) -> Result<()> {
        self.require_association(revision, line)?;
        if self.line(line)?.line_type == LineType::Spacing {
            return Err(ScriptError::validation("Cues cannot be added to spacing lines"));
        }
        if ident.trim().is_empty() {
            return Err(ScriptError::validation("Cue ident cannot be blank"));
        }
        Ok(())
    }

    pub(crate) fn add_cue(
        &mut self,
        revision: RevisionId,
        line: LineId,
        cue_type_id: CueTypeId,
        ident: &str,
    ) -> Result<CueId> {
        self.check_cue_target(revision, line, ident)?;
        let cue = Cue {
            id: CueId::new_v4(),
            cue_type_id,
            ident: ident.trim().to_owned(),
        };
        let id = cue.id;
        self.cues.insert(id, cue);
        self.put_cue_association(CueAssociation {
            revision_id: revision,
            line_id: line,
            cue_id: id,
        });
        self.touch_revision(revision)?;
        Ok(id)
    }

    /// Change a cue as seen from `revision`. Returns the id the revision now
    /// points at, which differs from `cue` when the cue had to be forked.
    pub(crate) fn update_cue(
        &mut self,
        revision: RevisionId,
        line: LineId,
        cue: CueId,
        cue_type_id: CueTypeId,
        ident: &str,
    ) -> Result<CueId> {
        self.check_cue_target(revision, line, ident)?;
        let assoc = CueAssociation {
            revision_id: revision,
            line_id: line,
            cue_id: cue,
        };
        if !self.has_cue_association(&assoc) {
            return Err(ScriptError::not_found(EntityKind::Cue, cue));
        }

        let ident = ident.trim().to_owned();
        let id = if self.cue_ref_count(cue) == 1 {
            let existing = self
                .cues
                .get_mut(&cue)
                .ok_or_else(|| ScriptError::not_found(EntityKind::Cue, cue))?;
            existing.cue_type_id = cue_type_id;
            existing.ident = ident;
            cue
        } else {
            let fork = Cue {
                id: CueId::new_v4(),
                cue_type_id,
                ident,
            };
            let id = fork.id;
            self.cues.insert(id, fork);
            self.remove_cue_association(&assoc);
            self.put_cue_association(CueAssociation { cue_id: id, ..assoc });
            log::debug!("Forked shared cue {cue} into {id} for revision {revision}");
            id
        };
        self.touch_revision(revision)?;
        Ok(id)
    }

    pub(crate) fn remove_cue(&mut self, revision: RevisionId, line: LineId, cue: CueId) -> Result<bool> {
        self.revision(revision)?;
        let removed = self.remove_cue_association(&CueAssociation {
            revision_id: revision,
            line_id: line,
            cue_id: cue,
        });
        if !removed {
            return Err(ScriptError::not_found(EntityKind::Cue, cue));
        }
        let collected = self.collect_cue(cue);
        self.touch_revision(revision)?;
        Ok(collected)
    }

    /// Cues of a revision grouped by the line they sit on.
    pub(crate) fn revision_cues(&self, revision: RevisionId) -> Result<BTreeMap<LineId, Vec<Cue>>> {
        self.revision(revision)?;
        let mut cues: BTreeMap<LineId, Vec<Cue>> = BTreeMap::new();
        for assoc in self.revision_cue_associations(revision) {
            cues.entry(assoc.line_id)
                .or_default()
                .push(self.cue(assoc.cue_id)?.clone());
        }
        Ok(cues)
    }

    pub(crate) fn line_cues(&self, revision: RevisionId, line: LineId) -> Result<Vec<Cue>> {
        self.line_cue_associations(revision, line)
            .iter()
            .map(|assoc| self.cue(assoc.cue_id).cloned())
            .collect()
    }

    /// Number of cues per cue type in a revision.
    pub(crate) fn cue_stats(&self, revision: RevisionId) -> Result<BTreeMap<CueTypeId, usize>> {
        self.revision(revision)?;
        let mut stats = BTreeMap::new();
        for assoc in self.revision_cue_associations(revision) {
            *stats.entry(self.cue(assoc.cue_id)?.cue_type_id).or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Replace the revision's cut set.
    pub(crate) fn set_cuts(&mut self, revision: RevisionId, parts: &[LinePartId]) -> Result<()> {
        self.revision(revision)?;
        let wanted: BTreeSet<LinePartId> = parts.iter().copied().collect();
        for part in &wanted {
            let owned = self
                .part_owner(*part)
                .is_some_and(|line| self.association(revision, line).is_some());
            if !owned {
                return Err(ScriptError::not_found(EntityKind::LinePart, *part));
            }
        }

        let existing: Vec<Cut> = self.revision_cuts(revision).copied().collect();
        for cut in &existing {
            if !wanted.contains(&cut.line_part_id) {
                self.remove_cut(cut);
            }
        }
        for part in wanted {
            self.insert_cut(Cut {
                revision_id: revision,
                line_part_id: part,
            });
        }
        self.touch_revision(revision)
    }

    pub(crate) fn cuts(&self, revision: RevisionId) -> Result<Vec<LinePartId>> {
        self.revision(revision)?;
        Ok(self
            .revision_cuts(revision)
            .map(|cut| cut.line_part_id)
            .collect())
    }

    pub(crate) fn is_cut(&self, revision: RevisionId, part: LinePartId) -> bool {
        self.has_cut(&Cut {
            revision_id: revision,
            line_part_id: part,
        })
    }
}
