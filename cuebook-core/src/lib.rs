//! # cuebook-core: Versioned script content engine
//!
//! Holds paginated show scripts with a branching revision history. Line and
//! cue content is shared between revisions until one of them edits it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   create / delete   ┌──────────────────┐
//! │ ScriptEngine │ ──────────────────► │ Revision tree    │
//! │ (staged txn) │                     │ (copy edges)     │
//! └──────┬───────┘                     └────────┬─────────┘
//!        │ page edits                           │ lost edges
//!        ▼                                      ▼
//! ┌──────────────┐   fork / unlink     ┌──────────────────┐
//! │ Line sequence│ ──────────────────► │ Orphan collector │
//! │ (per page)   │                     │ (refcounts)      │
//! └──────┬───────┘                     └──────────────────┘
//!        ▼
//! ┌──────────────────────────────────────────────────────┐
//! │ Tables: shared lines / cues + per-revision edges     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: Public facade, one staged transaction per mutation
//! - [`sequence`]: Page reconstruction and page edits
//! - [`revision`]: Revision tree create / delete / current pointer
//! - [`validate`]: Line type composition rules
//! - [`compiled`]: Whole-script page map for the compiled cache

pub mod compiled;
mod cues;
pub mod engine;
pub mod error;
pub mod ids;
pub mod model;
mod orphan;
pub mod revision;
pub mod sequence;
mod tables;
pub mod validate;

pub use compiled::{CompiledLine, CompiledScript};
pub use engine::ScriptEngine;
pub use error::{EntityKind, Result, ScriptError};
pub use ids::{
    ActId, CharacterGroupId, CharacterId, CueId, CueTypeId, LineId, LinePartId, RevisionId,
    SceneId, ScriptId, StageDirectionStyleId,
};
pub use model::{
    Cue, CueAssociation, Cut, Line, LineAssociation, LineDraft, LinePart, LineType, PartDraft,
    Placement, Revision, Script, ScriptMode, Speaker,
};
pub use orphan::SweepStats;
pub use revision::RevisionDeletion;
pub use sequence::{ChangeStatus, LineEdit, PageEdit, PageEditSummary, SubmittedLine};
pub use tables::EngineSnapshot;
pub use validate::validate_line;
