//! Revision tree manager.
//!
//! Each script owns a tree of revisions rooted at revision 1. Creating a
//! revision copies the parent's edges (associations, cue associations and
//! cuts) while the content they point at stays shared. Deleting one
//! reparents its children, drops its edges and hands whatever is left
//! unreferenced to the orphan collector.

use std::collections::HashMap;

use crate::error::{Result, ScriptError};
use crate::ids::{RevisionId, ScriptId};
use crate::model::{now_millis, CueAssociation, Cut, LineAssociation, Revision, Script, ScriptMode};
use crate::tables::Tables;

const ROOT_DESCRIPTION: &str = "Initial revision";

/// What a revision deletion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionDeletion {
    pub script_id: ScriptId,
    /// The deleted revision was current; `current_revision` now names the
    /// fallback.
    pub current_changed: bool,
    pub current_revision: Option<RevisionId>,
    pub children_reparented: usize,
    pub lines_collected: usize,
    pub cues_collected: usize,
}

impl Tables {
    /// Create a script together with its root revision, which becomes
    /// current.
    pub(crate) fn create_script(
        &mut self,
        name: &str,
        mode: ScriptMode,
    ) -> Result<(ScriptId, RevisionId)> {
        if name.trim().is_empty() {
            return Err(ScriptError::validation("Script name cannot be blank"));
        }
        let script_id = ScriptId::new_v4();
        let now = now_millis();
        let root = Revision {
            id: RevisionId::new_v4(),
            script_id,
            revision_no: 1,
            parent_revision_id: None,
            description: ROOT_DESCRIPTION.to_owned(),
            created_at: now,
            edited_at: now,
            edit_seq: 0,
        };
        let root_id = root.id;
        self.revisions.insert(root_id, root);
        self.scripts.insert(
            script_id,
            Script {
                id: script_id,
                name: name.trim().to_owned(),
                mode,
                current_revision: Some(root_id),
            },
        );
        log::info!("Created script {script_id} with root revision {root_id}");
        Ok((script_id, root_id))
    }

    /// Branch a new revision off `parent` (the script's current revision
    /// when `None`).
    pub(crate) fn create_revision(
        &mut self,
        script_id: ScriptId,
        parent: Option<RevisionId>,
        description: &str,
        set_as_current: bool,
    ) -> Result<RevisionId> {
        if description.trim().is_empty() {
            return Err(ScriptError::validation("Revision description cannot be blank"));
        }
        let script = self.script(script_id)?;
        let parent_id = match parent.or(script.current_revision) {
            Some(id) => id,
            None => {
                return Err(ScriptError::conflict(format!(
                    "Script {script_id} has no current revision to branch from"
                )))
            }
        };
        let parent = self.revision(parent_id)?;
        if parent.script_id != script_id {
            return Err(ScriptError::conflict(format!(
                "Revision {parent_id} belongs to another script"
            )));
        }

        let revision_no = self
            .script_revisions(script_id)
            .last()
            .map(|rev| rev.revision_no + 1)
            .unwrap_or(1);
        let now = now_millis();
        let id = RevisionId::new_v4();
        self.revisions.insert(
            id,
            Revision {
                id,
                script_id,
                revision_no,
                parent_revision_id: Some(parent_id),
                description: description.trim().to_owned(),
                created_at: now,
                edited_at: now,
                edit_seq: 0,
            },
        );

        let associations: Vec<LineAssociation> = self
            .revision_associations(parent_id)
            .map(|assoc| LineAssociation {
                revision_id: id,
                ..assoc.clone()
            })
            .collect();
        let cue_associations: Vec<CueAssociation> = self
            .revision_cue_associations(parent_id)
            .map(|assoc| CueAssociation {
                revision_id: id,
                ..*assoc
            })
            .collect();
        let cuts: Vec<Cut> = self
            .revision_cuts(parent_id)
            .map(|cut| Cut {
                revision_id: id,
                ..*cut
            })
            .collect();
        let copied = associations.len();
        for assoc in associations {
            self.put_association(assoc);
        }
        for assoc in cue_associations {
            self.put_cue_association(assoc);
        }
        for cut in cuts {
            self.insert_cut(cut);
        }

        if set_as_current {
            self.script_mut(script_id)?.current_revision = Some(id);
        }
        log::info!(
            "Created revision {revision_no} ({id}) of script {script_id} from {parent_id}, {copied} lines shared"
        );
        Ok(id)
    }

    pub(crate) fn delete_revision(&mut self, revision_id: RevisionId) -> Result<RevisionDeletion> {
        let revision = self.revision(revision_id)?.clone();
        if revision.is_root() || revision.parent_revision_id.is_none() {
            return Err(ScriptError::conflict("Cannot delete the root revision"));
        }
        let script_id = revision.script_id;

        let mut current_changed = false;
        if self.script(script_id)?.current_revision == Some(revision_id) {
            let fallback = match revision.parent_revision_id {
                Some(parent) if self.revisions.contains_key(&parent) => Some(parent),
                _ => self.root_revision(script_id).map(|root| root.id),
            };
            self.script_mut(script_id)?.current_revision = fallback;
            current_changed = true;
        }

        let children: Vec<RevisionId> = self
            .revisions
            .values()
            .filter(|rev| rev.parent_revision_id == Some(revision_id))
            .map(|rev| rev.id)
            .collect();
        for child in &children {
            self.revision_mut(*child)?.parent_revision_id = revision.parent_revision_id;
        }

        let associations: Vec<LineAssociation> =
            self.revision_associations(revision_id).cloned().collect();
        let cue_associations: Vec<CueAssociation> =
            self.revision_cue_associations(revision_id).copied().collect();
        let cuts: Vec<Cut> = self.revision_cuts(revision_id).copied().collect();

        for assoc in &associations {
            self.remove_association(revision_id, assoc.line_id);
        }
        for assoc in &cue_associations {
            self.remove_cue_association(assoc);
        }
        for cut in &cuts {
            self.remove_cut(cut);
        }
        self.revisions.remove(&revision_id);

        let lines_collected = self.collect_lines(associations.iter().map(|assoc| assoc.line_id));
        let cues_collected = self.collect_cues(cue_associations.iter().map(|assoc| assoc.cue_id));
        let current_revision = self.script(script_id)?.current_revision;

        log::info!(
            "Deleted revision {} ({revision_id}) of script {script_id}: {} children reparented, {lines_collected} lines and {cues_collected} cues collected",
            revision.revision_no,
            children.len()
        );
        Ok(RevisionDeletion {
            script_id,
            current_changed,
            current_revision,
            children_reparented: children.len(),
            lines_collected,
            cues_collected,
        })
    }

    pub(crate) fn set_current_revision(
        &mut self,
        script_id: ScriptId,
        revision_id: RevisionId,
    ) -> Result<()> {
        let revision = self.revision(revision_id)?;
        if revision.script_id != script_id {
            return Err(ScriptError::conflict(format!(
                "Revision {revision_id} belongs to another script"
            )));
        }
        self.script_mut(script_id)?.current_revision = Some(revision_id);
        Ok(())
    }

    pub(crate) fn current_revision(&self, script_id: ScriptId) -> Result<RevisionId> {
        self.script(script_id)?
            .current_revision
            .ok_or_else(|| {
                ScriptError::conflict(format!("Script {script_id} has no current revision"))
            })
    }

    /// All revisions of a script, ordered by revision number.
    pub(crate) fn script_revisions(&self, script_id: ScriptId) -> Vec<&Revision> {
        let mut revisions: Vec<&Revision> = self
            .revisions
            .values()
            .filter(|rev| rev.script_id == script_id)
            .collect();
        revisions.sort_by_key(|rev| rev.revision_no);
        revisions
    }

    fn root_revision(&self, script_id: ScriptId) -> Option<&Revision> {
        self.revisions
            .values()
            .find(|rev| rev.script_id == script_id && rev.parent_revision_id.is_none())
    }

    /// Every root-to-leaf path of the script's revision tree. Paths are
    /// ordered by their leaf's revision number.
    pub(crate) fn revision_tree(&self, script_id: ScriptId) -> Result<Vec<Vec<RevisionId>>> {
        self.script(script_id)?;
        let revisions = self.script_revisions(script_id);
        let mut children: HashMap<RevisionId, Vec<&Revision>> = HashMap::new();
        for rev in &revisions {
            if let Some(parent) = rev.parent_revision_id {
                children.entry(parent).or_default().push(*rev);
            }
        }

        let mut paths = Vec::new();
        let Some(root) = revisions.iter().find(|rev| rev.parent_revision_id.is_none()) else {
            return Ok(Vec::new());
        };
        let mut stack = vec![(*root, vec![root.id])];
        while let Some((rev, path)) = stack.pop() {
            match children.get(&rev.id) {
                Some(kids) => {
                    for kid in kids {
                        let mut next = path.clone();
                        next.push(kid.id);
                        stack.push((*kid, next));
                    }
                }
                None => paths.push((rev.revision_no, path)),
            }
        }
        paths.sort_by_key(|(leaf, _)| *leaf);
        let paths = paths.into_iter().map(|(_, path)| path).collect();
        Ok(paths)
    }
}
