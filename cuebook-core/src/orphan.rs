//! Orphan collector.
//!
//! Lines and cues are shared across revisions and die only when no edge in
//! any revision mentions them. Collection is idempotent: it may run several
//! times for the same id in one transaction, and a missing object is simply
//! reported as "nothing collected".

use crate::ids::{CueId, LineId, LinePartId};
use crate::tables::Tables;

/// Outcome of a full sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub lines_collected: usize,
    pub cues_collected: usize,
}

impl Tables {
    /// Delete `line` if no association references it any more.
    ///
    /// Cascades to its parts, every cut on those parts, and any cue
    /// association still sitting on the line (whose cues are collected in
    /// turn).
    pub(crate) fn collect_line(&mut self, line: LineId) -> bool {
        if self.line_ref_count(line) > 0 {
            return false;
        }
        let Some(removed) = self.remove_line(line) else {
            return false;
        };

        let parts: Vec<LinePartId> = removed.parts.iter().map(|part| part.id).collect();
        let cuts = self.purge_cuts_on_parts(&parts);

        for assoc in self.cue_associations_on_line(line) {
            self.remove_cue_association(&assoc);
            self.collect_cue(assoc.cue_id);
        }

        log::debug!(
            "Collected orphaned line {line} ({} parts, {cuts} cuts)",
            parts.len()
        );
        true
    }

    /// Delete `cue` if no cue association references it any more.
    pub(crate) fn collect_cue(&mut self, cue: CueId) -> bool {
        if self.cue_ref_count(cue) > 0 {
            return false;
        }
        let collected = self.cues.remove(&cue).is_some();
        if collected {
            log::debug!("Collected orphaned cue {cue}");
        }
        collected
    }

    pub(crate) fn collect_lines(&mut self, lines: impl IntoIterator<Item = LineId>) -> usize {
        lines
            .into_iter()
            .filter(|line| self.collect_line(*line))
            .count()
    }

    pub(crate) fn collect_cues(&mut self, cues: impl IntoIterator<Item = CueId>) -> usize {
        cues.into_iter().filter(|cue| self.collect_cue(*cue)).count()
    }

    /// Collect every unreferenced line and cue in the store.
    pub(crate) fn sweep(&mut self) -> SweepStats {
        let lines_collected = self.collect_lines(self.line_ids());
        let cues_collected = self.collect_cues(self.cue_ids());
        SweepStats {
            lines_collected,
            cues_collected,
        }
    }
}
