//! Full-script page map derived from one revision.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::{LinePartId, RevisionId};
use crate::model::{Cue, Line};
use crate::tables::Tables;

/// A line as rendered in a compiled script: its content plus the
/// revision-scoped cuts and cues attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledLine {
    #[serde(flatten)]
    pub line: Line,
    pub cut_parts: Vec<LinePartId>,
    pub cues: Vec<Cue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledScript {
    pub revision_id: RevisionId,
    /// `edit_seq` of the revision when this snapshot was taken.
    pub edit_seq: u64,
    pub max_page: u32,
    /// Every page from 1 to `max_page`, empty pages included.
    pub pages: BTreeMap<u32, Vec<CompiledLine>>,
}

impl CompiledScript {
    pub fn line_count(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.max_page == 0
    }
}

impl Tables {
    pub(crate) fn compile_snapshot(&self, revision: RevisionId) -> Result<CompiledScript> {
        let edit_seq = self.revision(revision)?.edit_seq;
        let max_page = self.max_page(revision)?;

        let mut pages = BTreeMap::new();
        for page in 1..=max_page {
            let mut compiled = Vec::new();
            for line in self.page_lines(revision, page)? {
                let cut_parts = line
                    .parts
                    .iter()
                    .map(|part| part.id)
                    .filter(|part| self.is_cut(revision, *part))
                    .collect();
                let cues = self.line_cues(revision, line.id)?;
                compiled.push(CompiledLine {
                    line: line.as_ref().clone(),
                    cut_parts,
                    cues,
                });
            }
            pages.insert(page, compiled);
        }

        Ok(CompiledScript {
            revision_id: revision,
            edit_seq,
            max_page,
            pages,
        })
    }
}
