//! Per-path resolution.
//!
//! Sweeps the path table in reverse lexicographic order (interleaved with
//! the tree writer so subtrees finish before their parents) and picks each
//! still-unresolved entry's result: matched-side shortcuts, content merges,
//! one-sided takes, or a recorded conflict. D/F conflicts whose directory
//! survived relocate the file to a `~branch` name first.

use std::rc::Rc;

use bstr::BString;
use ort_hash::ObjectId;

use crate::engine::Engine;
use crate::entry::{Entry, VersionInfo};
use crate::tree::{record_entry_for_tree, write_tree, DirectoryVersions};
use crate::{ConflictType, MergeError};

impl Engine<'_> {
    /// Resolve every entry and write the result tree bottom-up.
    pub(crate) fn process_entries(&mut self) -> Result<ObjectId, MergeError> {
        if self.paths.is_empty() {
            return write_tree(self.store, &[]);
        }

        let mut plist: Vec<Rc<BString>> = self.paths.keys().cloned().collect();
        plist.sort();

        let mut md = DirectoryVersions::new();
        for path in plist.iter().rev() {
            let dir = self
                .paths
                .get(path)
                .ok_or(MergeError::Internal("sweep entry vanished from path table"))?
                .merged()
                .directory_name
                .clone();
            self.write_completed_directories(&dir, &mut md)?;

            let is_clean = self
                .paths
                .get(path)
                .is_some_and(Entry::is_clean);
            if is_clean {
                let entry = self
                    .paths
                    .get(path)
                    .ok_or(MergeError::Internal("sweep entry vanished from path table"))?;
                record_entry_for_tree(&mut md, path, entry);
            } else {
                self.process_entry(path.clone(), &mut md)?;
            }
        }

        if md.offsets.len() != 1 || md.offsets[0].1 != 0 {
            return Err(MergeError::Internal("tree writer accounting is off"));
        }
        write_tree(self.store, &md.versions)
    }

    /// Resolve one unclean entry, relocating D/F-conflicted files as
    /// needed, and record it for the tree writer.
    fn process_entry(
        &mut self,
        path: Rc<BString>,
        md: &mut DirectoryVersions,
    ) -> Result<(), MergeError> {
        let mut path = path;
        let (df_conflict, has_dir_result, filemask, dirmask) = {
            let ci = self.conflict_ref(&path)?;
            debug_assert!(!ci.processed);
            (
                ci.df_conflict,
                ci.merged.result.is_some(),
                ci.filemask,
                ci.dirmask,
            )
        };
        self.conflict_mut(&path)?.processed = true;

        if filemask == 0 {
            // Placeholder for a directory that was recursed into.
            return Ok(());
        }

        let mut df_file_index = 0usize;
        if df_conflict && !has_dir_result {
            // The competing directory merged to nothing; this is a plain
            // file merge after all.
            self.conflict_mut(&path)?.df_conflict = false;
        } else if df_conflict && has_dir_result {
            if filemask == 1 {
                // The file existed only in the base; with both sides gone
                // it simply yields to the directory.
                self.conflict_mut(&path)?.filemask = 0;
                return Ok(());
            }

            // A side still has the file and the directory keeps the path,
            // so the file moves aside. The file's side is the one that
            // does not hold the directory (renames may have grown the
            // filemask, so the dirmask is what identifies it).
            df_file_index = if dirmask & 0b010 != 0 { 2 } else { 1 };
            let branch = if df_file_index == 1 {
                self.branch1.clone()
            } else {
                self.branch2.clone()
            };
            let new_path = self.unique_path(&path, &branch);
            let depth = self.call_depth;
            self.out.note(
                depth,
                1,
                &format!(
                    "CONFLICT (file/directory): directory in the way of {}; adding it as {} instead.",
                    path, new_path
                ),
            );

            let mut relocated = self.conflict_ref(&path)?.clone();
            relocated.merged.result = None;
            relocated.kind = relocated.kind.or(Some(ConflictType::DirectoryFile));
            let new_rc = Rc::new(new_path);
            self.paths
                .insert(new_rc.clone(), Entry::Conflicted(Box::new(relocated)));
            // The original entry now only carries the directory's subtree.
            self.conflict_mut(&path)?.filemask = 0;
            path = new_rc;
        }

        let ci = self.conflict_ref(&path)?.clone();
        let result: Option<VersionInfo>;
        let clean: bool;
        let mut kind = ci.kind;

        if ci.match_mask != 0 {
            // Two of the three versions are identical; take the odd one
            // out (or the shared version when the sides agree).
            clean = true;
            if ci.match_mask == 6 {
                result = ci.stages[1];
            } else {
                let othermask = 7 & !ci.match_mask;
                let side = if othermask == 4 { 2 } else { 1 };
                result = if ci.filemask == ci.match_mask {
                    None
                } else {
                    ci.stages[side]
                };
            }
        } else if ci.filemask >= 6 {
            // Both sides present: a content merge.
            let both_regular = ci.stages[1].is_some_and(|v| v.mode.is_blob())
                && ci.stages[2].is_some_and(|v| v.mode.is_blob());
            if both_regular {
                let depth = self.call_depth;
                self.out.note(depth, 2, &format!("Auto-merging {}", path));
            }

            let outcome = self.handle_content_merge(
                path.as_ref(),
                ci.stages[0],
                ci.stages[1],
                ci.stages[2],
                &ci.pathnames,
                2 * self.call_depth,
            )?;
            clean = outcome.clean && !ci.df_conflict;
            result = Some(outcome.version);
            kind = kind.or(outcome.kind);

            if outcome.clean && ci.df_conflict {
                // The merged file is moving aside for the directory; keep
                // its stage on the side it will be reported for.
                debug_assert!(df_file_index == 1 || df_file_index == 2);
                let target = self.conflict_mut(&path)?;
                target.filemask = 1 << df_file_index;
                target.stages[df_file_index] = Some(outcome.version);
            }
            if !outcome.clean {
                let reason = match outcome.kind {
                    Some(ConflictType::AddAdd) => "add/add",
                    Some(ConflictType::Submodule) => "submodule",
                    Some(ConflictType::TypeChange) => "distinct types",
                    _ => "content",
                };
                let depth = self.call_depth;
                self.out.note(
                    depth,
                    1,
                    &format!("CONFLICT ({}): Merge conflict in {}", reason, path),
                );
            }
        } else if ci.filemask == 3 || ci.filemask == 5 {
            // Modify/delete. Inner merges resolve to the base version so a
            // virtual ancestor does not look like it sided with anyone.
            let side = if ci.filemask == 5 { 2 } else { 1 };
            let index = if self.call_depth > 0 { 0 } else { side };
            result = ci.stages[index];
            clean = false;
            kind = kind.or(Some(ConflictType::ModifyDelete));

            let (modified_in, deleted_in) = if side == 1 {
                (self.branch1.clone(), self.branch2.clone())
            } else {
                (self.branch2.clone(), self.branch1.clone())
            };
            let depth = self.call_depth;
            self.out.note(
                depth,
                1,
                &format!(
                    "CONFLICT (modify/delete): {} deleted in {} and modified in {}.",
                    path, deleted_in, modified_in
                ),
            );
        } else if ci.filemask == 2 || ci.filemask == 4 {
            // Added on one side.
            let side = if ci.filemask == 4 { 2 } else { 1 };
            result = ci.stages[side];
            clean = !ci.df_conflict && !ci.path_conflict;
        } else if ci.filemask == 1 {
            // Deleted on both sides.
            result = None;
            clean = !ci.path_conflict;
        } else {
            return Err(MergeError::Internal("unexpected filemask during resolution"));
        }

        {
            let target = self.conflict_mut(&path)?;
            target.merged.result = result;
            target.merged.clean = clean;
            target.kind = kind;
        }
        if !clean {
            self.unmerged.push(path.clone());
        }

        let entry = self
            .paths
            .get(path.as_ref())
            .ok_or(MergeError::Internal("resolved entry vanished from path table"))?;
        record_entry_for_tree(md, &path, entry);
        Ok(())
    }

    /// A fresh path for a file displaced by a D/F conflict: the original
    /// path, `~`, and the branch name with slashes flattened, disambiguated
    /// with a numeric suffix until unused.
    pub(crate) fn unique_path(&self, path: &BString, branch: &str) -> BString {
        let mut base = path.clone();
        base.push(b'~');
        base.extend(
            branch
                .bytes()
                .map(|b| if b == b'/' { b'_' } else { b }),
        );

        let mut candidate = base.clone();
        let mut suffix = 0;
        while self.paths.contains_key(&candidate) {
            candidate = base.clone();
            candidate.extend_from_slice(format!("_{}", suffix).as_bytes());
            suffix += 1;
        }
        candidate
    }
}
