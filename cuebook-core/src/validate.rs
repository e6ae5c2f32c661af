//! Line type composition rules.
//!
//! | Type            | Parts | Speaker                    | Text                         |
//! |-----------------|-------|----------------------------|------------------------------|
//! | Dialogue        | ≥ 1   | exactly one per part       | some part must carry text    |
//! | Stage direction | 1     | none                       | required, not blank          |
//! | Cue line        | 0     | n/a                        | n/a                          |
//! | Spacing         | 0     | n/a                        | n/a                          |
//!
//! Compact scripts additionally cap dialogue at a single part.

use std::collections::HashSet;

use crate::error::{Result, ScriptError};
use crate::model::{LineDraft, LineType, ScriptMode};

/// Check a draft against its line type's rule.
pub fn validate_line(draft: &LineDraft, mode: ScriptMode) -> Result<()> {
    if draft.page == 0 {
        return Err(ScriptError::validation("Pages are numbered from 1"));
    }

    let mut seen = HashSet::with_capacity(draft.parts.len());
    for part in &draft.parts {
        if !seen.insert(part.part_index) {
            return Err(ScriptError::validation(format!(
                "Duplicate part index {}",
                part.part_index
            )));
        }
    }

    match draft.line_type {
        LineType::Dialogue => validate_dialogue(draft, mode),
        LineType::StageDirection => validate_stage_direction(draft),
        LineType::CueLine => validate_no_parts(draft, "Cue lines cannot have line parts"),
        LineType::Spacing => validate_no_parts(draft, "Spacing lines cannot have line parts"),
    }
}

fn validate_dialogue(draft: &LineDraft, mode: ScriptMode) -> Result<()> {
    let parts = &draft.parts;
    if parts.is_empty() {
        return Err(ScriptError::validation(
            "Dialogue lines must have at least one line part",
        ));
    }
    if mode == ScriptMode::Compact && parts.len() > 1 {
        return Err(ScriptError::validation(
            "Lines can only have 1 line part in compact script mode",
        ));
    }

    let any_text = parts.iter().any(|part| part.text.is_some());
    for part in parts {
        if part.text.is_none() {
            if parts.len() == 1 {
                return Err(ScriptError::validation("Dialogue lines must contain text"));
            }
            if !any_text {
                return Err(ScriptError::validation(
                    "At least one line part must contain text",
                ));
            }
        }
        if part.speaker.is_none() {
            return Err(ScriptError::validation(
                "Dialogue line parts must have a character or character group",
            ));
        }
    }
    Ok(())
}

fn validate_stage_direction(draft: &LineDraft) -> Result<()> {
    let [part] = draft.parts.as_slice() else {
        return Err(ScriptError::validation(
            "Stage directions must have exactly 1 line part",
        ));
    };
    if part.speaker.is_some() {
        return Err(ScriptError::validation(
            "Stage directions cannot have a speaker",
        ));
    }
    match part.text.as_deref() {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err(ScriptError::validation("Stage directions must contain text")),
    }
}

fn validate_no_parts(draft: &LineDraft, message: &str) -> Result<()> {
    if draft.parts.is_empty() {
        Ok(())
    } else {
        Err(ScriptError::validation(message))
    }
}
