//! Content store value types.
//!
//! `Line`, `LinePart` and `Cue` are immutable once written: an edit forks a
//! new value and repoints the owning revision's edges at it. The edge types
//! (`LineAssociation`, `CueAssociation`, `Cut`) are what give each revision
//! its own view of the shared content.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::ids::{
    ActId, CharacterGroupId, CharacterId, CueId, CueTypeId, LineId, LinePartId, RevisionId,
    SceneId, ScriptId, StageDirectionStyleId,
};

/// How strictly dialogue lines are split into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScriptMode {
    /// Dialogue lines may carry any number of parts.
    #[default]
    Full,
    /// Dialogue lines carry at most one part.
    Compact,
}

/// One script per show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub id: ScriptId,
    pub name: String,
    pub mode: ScriptMode,
    pub current_revision: Option<RevisionId>,
}

/// A node in the script's revision tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub script_id: ScriptId,
    /// Unique per script, assigned as max + 1. Revision 1 is the root.
    pub revision_no: u32,
    pub parent_revision_id: Option<RevisionId>,
    pub description: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Milliseconds since the Unix epoch.
    pub edited_at: u64,
    /// Bumped on every committed content mutation.
    pub edit_seq: u64,
}

impl Revision {
    pub fn is_root(&self) -> bool {
        self.revision_no == 1
    }
}

/// Closed set of line kinds. Each kind constrains its part composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineType {
    Dialogue,
    StageDirection,
    CueLine,
    Spacing,
}

/// Act/scene reference of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Placement {
    pub act_id: Option<ActId>,
    pub scene_id: Option<SceneId>,
}

/// Who speaks a line part: a single character or a character group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    Character(CharacterId),
    Group(CharacterGroupId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePart {
    pub id: LinePartId,
    pub line_id: LineId,
    pub part_index: u32,
    pub speaker: Option<Speaker>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub id: LineId,
    pub page: u32,
    pub line_type: LineType,
    pub placement: Placement,
    pub style_id: Option<StageDirectionStyleId>,
    /// Sorted by `part_index`.
    pub parts: Vec<LinePart>,
}

impl Line {
    /// Materialize a draft into a brand new line with fresh ids.
    pub fn from_draft(draft: &LineDraft) -> Self {
        let id = LineId::new_v4();
        let mut parts: Vec<LinePart> = draft
            .parts
            .iter()
            .map(|part| LinePart {
                id: LinePartId::new_v4(),
                line_id: id,
                part_index: part.part_index,
                speaker: part.speaker,
                text: part.text.clone(),
            })
            .collect();
        parts.sort_by_key(|part| part.part_index);
        Self {
            id,
            page: draft.page,
            line_type: draft.line_type,
            placement: draft.placement,
            style_id: draft.style_id,
            parts,
        }
    }

    pub fn part_by_index(&self, part_index: u32) -> Option<&LinePart> {
        self.parts.iter().find(|part| part.part_index == part_index)
    }
}

/// Per-revision edge placing a shared line in that revision's order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAssociation {
    pub revision_id: RevisionId,
    pub line_id: LineId,
    pub next_line_id: Option<LineId>,
    pub previous_line_id: Option<LineId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    pub id: CueId,
    pub cue_type_id: CueTypeId,
    pub ident: String,
}

/// Binds a cue to a line within one revision.
///
/// Field order matters: the derived ordering groups associations by
/// revision, then line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CueAssociation {
    pub revision_id: RevisionId,
    pub line_id: LineId,
    pub cue_id: CueId,
}

/// Marks a line part as struck in one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cut {
    pub revision_id: RevisionId,
    pub line_part_id: LinePartId,
}

/// Caller-supplied content for a new or forked line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDraft {
    pub page: u32,
    pub line_type: LineType,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub style_id: Option<StageDirectionStyleId>,
    #[serde(default)]
    pub parts: Vec<PartDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDraft {
    pub part_index: u32,
    pub speaker: Option<Speaker>,
    pub text: Option<String>,
}

impl LineDraft {
    /// Single-part dialogue line.
    pub fn dialogue(page: u32, speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            page,
            line_type: LineType::Dialogue,
            placement: Placement::default(),
            style_id: None,
            parts: vec![PartDraft {
                part_index: 0,
                speaker: Some(speaker),
                text: Some(text.into()),
            }],
        }
    }

    pub fn stage_direction(page: u32, text: impl Into<String>) -> Self {
        Self {
            page,
            line_type: LineType::StageDirection,
            placement: Placement::default(),
            style_id: None,
            parts: vec![PartDraft {
                part_index: 0,
                speaker: None,
                text: Some(text.into()),
            }],
        }
    }

    pub fn cue_line(page: u32) -> Self {
        Self::empty(page, LineType::CueLine)
    }

    pub fn spacing(page: u32) -> Self {
        Self::empty(page, LineType::Spacing)
    }

    fn empty(page: u32, line_type: LineType) -> Self {
        Self {
            page,
            line_type,
            placement: Placement::default(),
            style_id: None,
            parts: Vec::new(),
        }
    }

    /// Append another part after the existing ones.
    pub fn with_part(mut self, speaker: Option<Speaker>, text: Option<String>) -> Self {
        let part_index = self
            .parts
            .iter()
            .map(|part| part.part_index + 1)
            .max()
            .unwrap_or(0);
        self.parts.push(PartDraft {
            part_index,
            speaker,
            text,
        });
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_style(mut self, style_id: StageDirectionStyleId) -> Self {
        self.style_id = Some(style_id);
        self
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
