use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::ids::RevisionId;

/// Entity named in a [`ScriptError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Script,
    Revision,
    Line,
    LinePart,
    Cue,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Script => "Script",
            EntityKind::Revision => "Revision",
            EntityKind::Line => "Line",
            EntityKind::LinePart => "Line part",
            EntityKind::Cue => "Cue",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Line content breaks its type's composition rule, or the request is
    /// malformed. Nothing was committed.
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Uuid },
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The per-revision line chain is broken. Never resolved by guessing.
    #[error("Page order corrupted: revision {revision}, page {page} has {candidates} start candidates")]
    PageOrderCorruption {
        revision: RevisionId,
        page: u32,
        candidates: usize,
    },
    #[error("Engine lock poisoned")]
    LockPoisoned,
}

impl ScriptError {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<Uuid>) -> Self {
        ScriptError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ScriptError::Validation(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        ScriptError::Conflict(message.into())
    }
}

pub type Result<T, E = ScriptError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScriptError::not_found(EntityKind::Revision, Uuid::nil());
        assert!(err.to_string().contains("Revision not found"));

        let err = ScriptError::PageOrderCorruption {
            revision: RevisionId::MIN,
            page: 4,
            candidates: 2,
        };
        assert!(err.to_string().contains("page 4 has 2 start candidates"));
    }
}
