//! Typed identifiers.
//!
//! Every entity is addressed by identity, never by content hash. The
//! newtypes keep a `LineId` from being passed where a `CueId` is expected;
//! all of them are plain UUIDs on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Lowest possible id, used as a range bound.
            pub const MIN: Self = Self(Uuid::nil());
            /// Highest possible id, used as a range bound.
            pub const MAX: Self = Self(Uuid::max());

            /// Generate a fresh random id.
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// A show's script.
    ScriptId
);
define_id!(
    /// A node in a script's revision tree.
    RevisionId
);
define_id!(
    /// A shared line of script content.
    LineId
);
define_id!(
    /// One part of a line.
    LinePartId
);
define_id!(
    /// A shared cue value.
    CueId
);
define_id!(ActId);
define_id!(SceneId);
define_id!(CharacterId);
define_id!(CharacterGroupId);
define_id!(CueTypeId);
define_id!(StageDirectionStyleId);
