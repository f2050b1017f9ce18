//! The rename engine.
//!
//! For each side, file pairs come from the external rename detector.
//! Directory renames are inferred from them by majority vote and applied to
//! the other side's new files, with collision and exclusion checks. The
//! surviving pairs from both sides are then sorted by source path and
//! walked once, mutating the path table for every rename shape:
//! rename/rename onto one or two targets, rename/add, rename/add/delete,
//! and plain renames.

use std::collections::HashMap;
use std::rc::Rc;

use bstr::{BString, ByteSlice};
use ort_diff::tree::diff_trees;
use ort_diff::{DiffOptions, FilePair, FileStatus};
use ort_hash::ObjectId;

use crate::engine::Engine;
use crate::entry::{ConflictInfo, Entry};
use crate::{ConflictType, DirectoryRenames, MergeError, RenameDetection};

/// A surviving rename pair with the side it came from (1 or 2).
pub(crate) struct Rename {
    pair: FilePair,
    side: u8,
}

/// Inferred rename of one directory.
struct DirRename {
    /// Majority target; meaningless when `non_unique`.
    new_dir: BString,
    /// No target won the vote.
    non_unique: bool,
}

type DirRenameMap = HashMap<BString, DirRename>;

/// Sources that would land on one post-rename target path.
struct CollisionInfo {
    source_files: Vec<BString>,
    reported: bool,
}

type CollisionMap = HashMap<BString, CollisionInfo>;

impl Engine<'_> {
    /// Run rename detection for both sides and fold the results into the
    /// path table. Returns false when a directory rename had to be skipped
    /// (the merge is unclean even if no entry ends up unmerged).
    pub(crate) fn detect_and_process_renames(
        &mut self,
        merge_base: &ObjectId,
        side1: &ObjectId,
        side2: &ObjectId,
    ) -> Result<bool, MergeError> {
        if self.opts.detect_renames == RenameDetection::Off {
            return Ok(true);
        }

        // Copy detection is clamped to plain rename detection.
        let diff_opts = DiffOptions {
            detect_renames: true,
            rename_threshold: self.opts.rename_score,
            rename_limit: self.opts.rename_limit,
        };
        let side1_diff = diff_trees(self.store, Some(merge_base), Some(side1), &diff_opts)?;
        let side2_diff = diff_trees(self.store, Some(merge_base), Some(side2), &diff_opts)?;
        self.needed_rename_limit = self
            .needed_rename_limit
            .max(side1_diff.needed_rename_limit)
            .max(side2_diff.needed_rename_limit);

        // Directory renames need a reason to exist: candidate sources from
        // the collector, the option enabled, and an outermost merge.
        let need_dir_renames = self.call_depth == 0
            && !self.dir_rename_sources.is_empty()
            && self.opts.detect_directory_renames != DirectoryRenames::None;

        let (dir_renames1, dir_renames2) = if need_dir_renames {
            (
                directory_renames(&side1_diff.files),
                directory_renames(&side2_diff.files),
            )
        } else {
            (DirRenameMap::new(), DirRenameMap::new())
        };

        let mut clean = true;
        let mut combined: Vec<Rename> = Vec::new();
        // A side's adds follow the *other* side's directory renames; a
        // side's own directory renames are the exclusions that stop the
        // other side from renaming the same source differently.
        clean &= self.collect_renames(&mut combined, 1, side1_diff.files, &dir_renames2, &dir_renames1)?;
        clean &= self.collect_renames(&mut combined, 2, side2_diff.files, &dir_renames1, &dir_renames2)?;

        combined.sort_by(|a, b| {
            a.pair
                .old_path
                .cmp(&b.pair.old_path)
                .then(a.side.cmp(&b.side))
        });

        self.process_renames(&combined)?;
        Ok(clean)
    }

    /// Filter one side's pairs down to renames (and adds relocated by the
    /// other side's directory renames), rewriting targets as needed.
    fn collect_renames(
        &mut self,
        combined: &mut Vec<Rename>,
        side: u8,
        pairs: Vec<FilePair>,
        dir_renames_for_side: &DirRenameMap,
        rename_exclusions: &DirRenameMap,
    ) -> Result<bool, MergeError> {
        let mut clean = true;
        let mut collisions = compute_collisions(dir_renames_for_side, &pairs);

        for mut pair in pairs {
            if !matches!(pair.status, FileStatus::Added | FileStatus::Renamed) {
                continue;
            }

            let target = pair
                .new_path
                .clone()
                .ok_or(MergeError::Internal("rename pair without a target path"))?;
            let new_path = self.check_for_directory_rename(
                &target,
                side,
                dir_renames_for_side,
                rename_exclusions,
                &mut collisions,
                &mut clean,
            )?;

            if pair.status != FileStatus::Renamed && new_path.is_none() {
                // A plain add that no directory rename touches.
                continue;
            }

            // Adds enter the combined list with source == target, so the
            // later scan can group pairs by source path uniformly.
            if pair.old_path.is_none() {
                pair.old_path = Some(target);
            }
            if let Some(new_path) = new_path {
                self.apply_directory_rename_modifications(&mut pair, new_path, side)?;
            }
            combined.push(Rename { pair, side });
        }

        Ok(clean)
    }

    /// Find the directory rename applying to `path`, if any survives the
    /// exclusion and collision checks.
    fn check_for_directory_rename(
        &mut self,
        path: &BString,
        side: u8,
        dir_renames: &DirRenameMap,
        rename_exclusions: &DirRenameMap,
        collisions: &mut CollisionMap,
        clean: &mut bool,
    ) -> Result<Option<BString>, MergeError> {
        if dir_renames.is_empty() {
            return Ok(None);
        }
        let Some((old_dir, info)) = dir_rename_key(path, dir_renames) else {
            return Ok(None);
        };

        // Do not apply an implicit rename into a directory the other side
        // is busy renaming away; that would manufacture a spurious
        // rename/rename conflict against the authoritative renamer.
        if rename_exclusions.contains_key(&old_dir) {
            let depth = self.call_depth;
            let message = format!(
                "WARNING: avoiding applying {} -> {} rename to {}, because {} itself was renamed.",
                old_dir, info.new_dir, path, old_dir
            );
            self.out.note(depth, 1, &message);
            return Ok(None);
        }

        self.handle_path_level_conflicts(path, side, &old_dir, info, collisions, clean)
    }

    /// Apply the directory rename to one path unless the target is
    /// contested; contested targets keep their original path and demote
    /// the merge to unclean with a diagnostic.
    fn handle_path_level_conflicts(
        &mut self,
        path: &BString,
        side: u8,
        old_dir: &BString,
        info: &DirRename,
        collisions: &mut CollisionMap,
        clean: &mut bool,
    ) -> Result<Option<BString>, MergeError> {
        let depth = self.call_depth;

        if info.non_unique {
            let message = format!(
                "CONFLICT (directory rename split): unclear where to place {} because directory {} was renamed to multiple other directories, with no destination getting a majority of the files.",
                path, old_dir
            );
            self.out.note(depth, 1, &message);
            *clean = false;
            return Ok(None);
        }

        let new_path = apply_dir_rename(old_dir, info, path);
        let c_info = collisions
            .get_mut(&new_path)
            .ok_or(MergeError::Internal("rename target missing from collision table"))?;

        if c_info.reported {
            *clean = false;
            return Ok(None);
        }
        if path_in_way(&self.paths, &new_path, 1 << side) {
            c_info.reported = true;
            let sources = join_paths(&c_info.source_files);
            let message = format!(
                "CONFLICT (implicit dir rename): existing file/dir at {} in the way of implicit directory rename(s) putting the following path(s) there: {}.",
                new_path, sources
            );
            self.out.note(depth, 1, &message);
            *clean = false;
            return Ok(None);
        }
        if c_info.source_files.len() > 1 {
            c_info.reported = true;
            let sources = join_paths(&c_info.source_files);
            let message = format!(
                "CONFLICT (implicit dir rename): cannot map more than one path to {}; implicit directory renames tried to put these paths there: {}.",
                new_path, sources
            );
            self.out.note(depth, 1, &message);
            *clean = false;
            return Ok(None);
        }

        Ok(Some(new_path))
    }

    /// Move the path-table entry behind a directory-renamed pair to its new
    /// key, creating synthetic parent directories and merging with any
    /// entry the other side already has at the target.
    fn apply_directory_rename_modifications(
        &mut self,
        pair: &mut FilePair,
        new_path: BString,
        side: u8,
    ) -> Result<(), MergeError> {
        let old_path = pair
            .new_path
            .clone()
            .ok_or(MergeError::Internal("rename pair without a target path"))?;
        let (_old_rc, mut entry) = self
            .paths
            .remove_entry(&old_path)
            .ok_or(MergeError::Internal("directory rename source missing from path table"))?;
        let Entry::Conflicted(ci) = &mut entry else {
            return Err(MergeError::Internal("directory rename moved a resolved path"));
        };

        // Find the nearest existing ancestor of the new location and note
        // every directory missing in between.
        let mut missing: Vec<BString> = Vec::new();
        let mut cursor = new_path.clone();
        let mut parent_rc = loop {
            let parent = match cursor.rfind_byte(b'/') {
                Some(pos) => BString::from(&cursor[..pos]),
                None => break self.root_dir.clone(),
            };
            if let Some((rc, _)) = self.paths.get_key_value(&parent) {
                break rc.clone();
            }
            missing.push(parent.clone());
            cursor = parent;
        };

        // Materialize the missing parents top-down so each child can share
        // its parent's interned name.
        for dir in missing.into_iter().rev() {
            let rc = Rc::new(dir);
            let offset = basename_offset_for(&parent_rc);
            let mut dir_ci = ConflictInfo::new(rc.clone(), parent_rc.clone(), offset);
            dir_ci.dirmask = ci.filemask;
            self.paths.insert(rc.clone(), Entry::Conflicted(Box::new(dir_ci)));
            parent_rc = rc;
        }

        // Re-home the moved entry.
        ci.merged.directory_name = parent_rc.clone();
        ci.merged.basename_offset = basename_offset_for(&parent_rc);
        let new_rc = Rc::new(new_path.clone());
        for i in 0..3 {
            if ci.filemask & (1 << i) != 0 {
                ci.pathnames[i] = new_rc.clone();
            }
        }

        if self.opts.detect_directory_renames == DirectoryRenames::Conflict {
            ci.path_conflict = true;
            ci.kind = Some(ConflictType::FileLocation);
            let branch = if side == 1 { &self.branch1 } else { &self.branch2 };
            let message = format!(
                "CONFLICT (file location): {} added in {} inside a directory that was renamed, suggesting it should perhaps be moved to {}.",
                old_path, branch, new_path
            );
            let depth = self.call_depth;
            self.out.note(depth, 1, &message);
        }

        match self.paths.get_mut(&new_path) {
            None => {
                self.paths.insert(new_rc, entry);
            }
            Some(existing) => {
                // The other side's version of the target already has an
                // entry; fold this side's stage into it.
                let Entry::Conflicted(existing_ci) = existing else {
                    return Err(MergeError::Internal("rename target entry already resolved"));
                };
                debug_assert!(ci.filemask == 2 || ci.filemask == 4);
                debug_assert_eq!(existing_ci.filemask & ci.filemask, 0);
                debug_assert!(!existing_ci.merged.clean);

                let index = (ci.filemask >> 1) as usize;
                existing_ci.filemask |= ci.filemask;
                existing_ci.stages[index] = ci.stages[index];
                existing_ci.pathnames[index] = ci.pathnames[index].clone();
                if ci.path_conflict {
                    existing_ci.path_conflict = true;
                    existing_ci.kind = existing_ci.kind.or(ci.kind);
                }
            }
        }

        pair.new_path = Some(new_path);
        Ok(())
    }

    /// Walk the combined, sorted rename list and rewrite path-table entries
    /// for every rename shape.
    fn process_renames(&mut self, renames: &[Rename]) -> Result<(), MergeError> {
        let mut i = 0;
        while i < renames.len() {
            let rename = &renames[i];
            let Some(oldpath) = rename.pair.old_path.clone() else {
                i += 1;
                continue;
            };
            let newpath = rename
                .pair
                .new_path
                .clone()
                .ok_or(MergeError::Internal("rename pair without a target path"))?;

            // A source a parent-directory resolution removed, or one the
            // other side never touched, needs no rename handling.
            let moot = match self.paths.get(&oldpath) {
                None => true,
                Some(entry) => entry.is_clean(),
            };
            if moot {
                i += 1;
                continue;
            }

            let grouped = renames
                .get(i + 1)
                .is_some_and(|next| next.pair.old_path.as_ref() == Some(&oldpath));
            if grouped {
                let newpath2 = renames[i + 1]
                    .pair
                    .new_path
                    .clone()
                    .ok_or(MergeError::Internal("rename pair without a target path"))?;
                self.process_rename_rename(&oldpath, &newpath, &newpath2)?;
                i += 2;
                continue;
            }

            self.process_single_rename(&oldpath, &newpath, rename.side)?;
            i += 1;
        }
        Ok(())
    }

    /// Both sides renamed the same source: to one target (1→1) or two
    /// (1→2).
    fn process_rename_rename(
        &mut self,
        oldpath: &BString,
        newpath: &BString,
        newpath2: &BString,
    ) -> Result<(), MergeError> {
        let old_rc = self.path_rc(oldpath)?;

        if newpath == newpath2 {
            // Same target on both sides: carry the base stage over and
            // retire the source.
            let base_stage = self.conflict_ref(oldpath)?.stages[0];
            let target = self.conflict_mut(newpath)?;
            target.stages[0] = base_stage;
            target.filemask |= 1;
            target.pathnames[0] = old_rc;
            self.conflict_mut(oldpath)?.resolve_by_removal();
            return Ok(());
        }

        // rename/rename(1→2): content-merge the base against each side's
        // content, then plant the result in both targets as a path
        // conflict. The source itself is resolved by removal.
        let new1_rc = self.path_rc(newpath)?;
        let new2_rc = self.path_rc(newpath2)?;
        let base_stage = self.conflict_ref(oldpath)?.stages[0];
        let side1_stage = self.conflict_ref(newpath)?.stages[1];
        let side2_stage = self.conflict_ref(newpath2)?.stages[2];
        let pathnames = [old_rc, new1_rc, new2_rc];

        let outcome = self.handle_content_merge(
            oldpath,
            base_stage,
            side1_stage,
            side2_stage,
            &pathnames,
            1 + 2 * self.call_depth,
        )?;

        let target1 = self.conflict_mut(newpath)?;
        target1.stages[1] = Some(outcome.version);
        target1.path_conflict = true;
        target1.kind = Some(ConflictType::RenameRename);

        let target2 = self.conflict_mut(newpath2)?;
        target2.stages[2] = Some(outcome.version);
        target2.path_conflict = true;
        target2.kind = Some(ConflictType::RenameRename);

        self.conflict_mut(oldpath)?.resolve_by_removal();

        let (branch1, branch2) = (self.branch1.clone(), self.branch2.clone());
        let depth = self.call_depth;
        let message = format!(
            "CONFLICT (rename/rename): {} renamed to {} in {} and to {} in {}.",
            oldpath, newpath, branch1, newpath2, branch2
        );
        self.out.note(depth, 1, &message);
        Ok(())
    }

    /// One side renamed the source; the other may have kept, modified,
    /// deleted, or replaced it.
    fn process_single_rename(
        &mut self,
        oldpath: &BString,
        newpath: &BString,
        side: u8,
    ) -> Result<(), MergeError> {
        let target_index = side as usize;
        let other_index = 3 - target_index;
        let other_sidemask = 1u8 << other_index;

        let (source_deleted, base_stage, other_stage) = {
            let oldinfo = self.conflict_ref(oldpath)?;
            (
                oldinfo.filemask == 1,
                oldinfo.stages[0],
                oldinfo.stages[other_index],
            )
        };
        let collision = self.conflict_ref(newpath)?.filemask & other_sidemask != 0;
        debug_assert!(source_deleted || other_stage.is_some());

        let old_rc = self.path_rc(oldpath)?;
        self.conflict_mut(oldpath)?.resolve_by_removal();

        if collision && !source_deleted {
            // rename/add (or rename/rename(2→1)): merge the base and the
            // renamed content against the other side's file at the target,
            // and stage the result for the renaming side.
            let new_rc = self.path_rc(newpath)?;
            let mut pathnames = [old_rc.clone(), old_rc.clone(), old_rc];
            pathnames[target_index] = new_rc;
            let stage1 = self
                .conflict_ref_rc(&pathnames[1])?
                .stages[1];
            let stage2 = self
                .conflict_ref_rc(&pathnames[2])?
                .stages[2];

            let outcome = self.handle_content_merge(
                oldpath,
                base_stage,
                stage1,
                stage2,
                &pathnames,
                1 + 2 * self.call_depth,
            )?;

            let target = self.conflict_mut(newpath)?;
            target.stages[target_index] = Some(outcome.version);
            target.kind = Some(ConflictType::RenameAdd);

            let (branch1, branch2) = (self.branch1.clone(), self.branch2.clone());
            let (rename_branch, add_branch) = if side == 1 {
                (branch1, branch2)
            } else {
                (branch2, branch1)
            };
            let depth = self.call_depth;
            let message = format!(
                "CONFLICT (rename/add): {} renamed to {} in {}; {} added in {}.",
                oldpath, newpath, rename_branch, newpath, add_branch
            );
            self.out.note(depth, 1, &message);
        } else if collision && source_deleted {
            // rename/add/delete: the side that did not rename deleted the
            // source, so there is no content merge to do; the target is
            // left looking like an add/add.
        } else {
            // Plain rename (possibly modify/delete on the other side):
            // carry the base stage, and the other side's stage if it still
            // exists, over to the target.
            let target = self.conflict_mut(newpath)?;
            target.stages[0] = base_stage;
            target.filemask |= 1;
            target.pathnames[0] = old_rc.clone();
            if !source_deleted {
                target.stages[other_index] = other_stage;
                target.filemask |= other_sidemask;
                target.pathnames[other_index] = old_rc;
            }
        }
        Ok(())
    }

    fn path_rc(&self, path: &BString) -> Result<Rc<BString>, MergeError> {
        self.paths
            .get_key_value(path)
            .map(|(rc, _)| rc.clone())
            .ok_or(MergeError::Internal("path missing from table"))
    }

    pub(crate) fn conflict_ref(&self, path: &BString) -> Result<&ConflictInfo, MergeError> {
        self.paths
            .get(path)
            .and_then(Entry::conflict)
            .ok_or(MergeError::Internal("expected an unresolved path entry"))
    }

    fn conflict_ref_rc(&self, path: &Rc<BString>) -> Result<&ConflictInfo, MergeError> {
        self.conflict_ref(path.as_ref())
    }

    pub(crate) fn conflict_mut(&mut self, path: &BString) -> Result<&mut ConflictInfo, MergeError> {
        self.paths
            .get_mut(path)
            .and_then(Entry::conflict_mut)
            .ok_or(MergeError::Internal("expected an unresolved path entry"))
    }
}

fn basename_offset_for(dir: &BString) -> usize {
    if dir.is_empty() {
        0
    } else {
        dir.len() + 1
    }
}

fn join_paths(paths: &[BString]) -> String {
    paths
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// True when something on this side (or an already-resolved entry) already
/// occupies `path`.
fn path_in_way(
    paths: &HashMap<Rc<BString>, Entry>,
    path: &BString,
    side_mask: u8,
) -> bool {
    match paths.get(path) {
        None => false,
        Some(Entry::Resolved(_)) => true,
        Some(Entry::Conflicted(ci)) => {
            ci.merged.clean || side_mask & (ci.filemask | ci.dirmask) != 0
        }
    }
}

/// Infer directory renames from one side's pairs by majority vote: each
/// renamed file votes its `(old_dir → new_dir)` prefix pair; the target
/// with the strictly largest count wins, ties win nothing.
fn directory_renames(pairs: &[FilePair]) -> DirRenameMap {
    let mut counts: HashMap<BString, HashMap<BString, usize>> = HashMap::new();
    for pair in pairs {
        if pair.status != FileStatus::Renamed {
            continue;
        }
        let (Some(old), Some(new)) = (pair.old_path.as_ref(), pair.new_path.as_ref()) else {
            continue;
        };
        if let Some((old_dir, new_dir)) = renamed_dir_portion(old, new) {
            *counts
                .entry(old_dir)
                .or_default()
                .entry(new_dir)
                .or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .map(|(old_dir, possible_new_dirs)| {
            let mut max = 0usize;
            let mut bad_max = 0usize;
            let mut best: Option<BString> = None;
            for (dir, count) in possible_new_dirs {
                if count == max {
                    bad_max = max;
                } else if count > max {
                    max = count;
                    best = Some(dir);
                }
            }
            let info = DirRename {
                non_unique: bad_max == max,
                new_dir: best.unwrap_or_default(),
            };
            (old_dir, info)
        })
        .collect()
}

/// Split a rename into its changed directory-prefix portion, dropping the
/// maximal common run of trailing components. `None` means the containing
/// directory did not change (including anything renamed straight out of
/// the root, which never counts as a directory rename).
fn renamed_dir_portion(old_path: &BString, new_path: &BString) -> Option<(BString, BString)> {
    let end_of_old = old_path.rfind_byte(b'/')?;
    let Some(end_of_new) = new_path.rfind_byte(b'/') else {
        // The whole directory collapsed into the root.
        return Some((BString::from(&old_path[..end_of_old]), BString::default()));
    };

    // Scan backwards from just before the final separators over the common
    // trailing run.
    let mut eo = end_of_old;
    let mut en = end_of_new;
    loop {
        if eo == 0 || en == 0 {
            break;
        }
        eo -= 1;
        en -= 1;
        if old_path[eo] != new_path[en] {
            break;
        }
        if eo == 0 || en == 0 {
            break;
        }
    }

    if eo == 0 && en == 0 && old_path[0] == new_path[0] {
        // Only the basename changed.
        return None;
    }
    if en == 0 && eo > 0 && old_path[eo - 1] == b'/' {
        // A subdirectory merged into the root.
        return Some((BString::from(&old_path[..eo - 1]), BString::default()));
    }

    // The mismatch sits inside the first differing trailing component;
    // advance both to the next separator to cover that whole component.
    let next_old = old_path[eo + 1..].find_byte(b'/').map(|p| p + eo + 1)?;
    let next_new = new_path[en + 1..].find_byte(b'/').map(|p| p + en + 1)?;
    Some((
        BString::from(&old_path[..next_old]),
        BString::from(&new_path[..next_new]),
    ))
}

/// Deepest-ancestor-first lookup of a directory rename covering `path`.
fn dir_rename_key<'m>(
    path: &BString,
    dir_renames: &'m DirRenameMap,
) -> Option<(BString, &'m DirRename)> {
    let mut end = path.len();
    while let Some(pos) = path[..end].rfind_byte(b'/') {
        let prefix = &path[..pos];
        if let Some(info) = dir_renames.get(prefix.as_bstr()) {
            return Some((BString::from(prefix), info));
        }
        end = pos;
    }
    None
}

/// Substitute the renamed directory prefix of `path`. With an empty target
/// (a rename into the root) the separating slash goes too.
fn apply_dir_rename(old_dir: &BString, info: &DirRename, path: &BString) -> BString {
    let mut skip = old_dir.len();
    if info.new_dir.is_empty() {
        skip += 1;
    }
    let mut out = info.new_dir.clone();
    out.extend_from_slice(&path[skip..]);
    out
}

/// Pre-compute, per post-rename target, every source that would land
/// there.
fn compute_collisions(dir_renames: &DirRenameMap, pairs: &[FilePair]) -> CollisionMap {
    let mut collisions = CollisionMap::new();
    if dir_renames.is_empty() {
        return collisions;
    }
    for pair in pairs {
        if !matches!(pair.status, FileStatus::Added | FileStatus::Renamed) {
            continue;
        }
        let Some(target) = pair.new_path.as_ref() else {
            continue;
        };
        let Some((old_dir, info)) = dir_rename_key(target, dir_renames) else {
            continue;
        };
        if info.non_unique {
            continue;
        }
        let new_path = apply_dir_rename(&old_dir, info, target);
        collisions
            .entry(new_path)
            .or_insert_with(|| CollisionInfo {
                source_files: Vec::new(),
                reported: false,
            })
            .source_files
            .push(target.clone());
    }
    collisions
}
