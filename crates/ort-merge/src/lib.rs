//! Three-way tree merge engine.
//!
//! Given a merge-base tree and two descendant trees, computes a merged tree
//! in the object store and reports per-path conflicts. The pipeline: a
//! synchronized three-tree walk populates a path table, rename and
//! directory-rename detection rewrites it, a per-path resolver picks each
//! entry's result, and a bottom-up writer emits the merged tree. Multiple
//! merge bases are folded into a virtual base by the recursive driver.

mod collect;
mod content;
mod engine;
mod entry;
mod output;
mod process;
mod rename;
mod tree;

pub use engine::{merge_commits, merge_trees, Merger};
pub use entry::{ConflictInfo, Entry, MergedInfo, VersionInfo};
pub use ort_diff::DiffAlgorithm;

use bstr::{BStr, BString};
use ort_diff::DiffError;
use ort_hash::ObjectId;
use ort_object::FileMode;
use ort_odb::OdbError;

/// Options for a merge operation.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Rename detection level. `Copies` is accepted for configuration
    /// compatibility but clamped to `Renames`; a merge should not propagate
    /// one base file's change into several copies.
    pub detect_renames: RenameDetection,
    /// Directory rename handling for files added inside a renamed directory.
    pub detect_directory_renames: DirectoryRenames,
    /// Bound handed to the rename detector's similarity pass.
    pub rename_limit: usize,
    /// Similarity threshold (0-100) handed to the rename detector.
    pub rename_score: u8,
    /// Forced resolution of conflicting content regions at the outermost
    /// level; inner base merges always use `Normal`.
    pub recursive_variant: MergeVariant,
    /// Normalize CRLF line endings before content merging.
    pub renormalize: bool,
    /// Line-diff algorithm for content merges.
    pub diff_algorithm: DiffAlgorithm,
    /// Conflict marker style for content merges.
    pub conflict_style: ConflictStyle,
    /// Label for side 1 in conflict markers and messages.
    pub branch1: String,
    /// Label for side 2.
    pub branch2: String,
    /// Label for the merge base; derived from the bases when absent.
    pub ancestor: Option<String>,
    /// Graft the other side's tree at this path prefix before merging
    /// (subtree merge). Empty means no shift.
    pub subtree_shift: Option<BString>,
    /// Diagnostic verbosity, 0-5.
    pub verbosity: u8,
    /// Diagnostic buffering: 0 emits immediately, 1 buffers and flushes to
    /// stdout when the merge finishes, 2 keeps everything on the result.
    pub buffer_output: u8,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            detect_renames: RenameDetection::Renames,
            detect_directory_renames: DirectoryRenames::True,
            rename_limit: 1000,
            rename_score: 50,
            recursive_variant: MergeVariant::Normal,
            renormalize: false,
            diff_algorithm: DiffAlgorithm::Myers,
            conflict_style: ConflictStyle::Merge,
            branch1: "HEAD".to_string(),
            branch2: "merge".to_string(),
            ancestor: None,
            subtree_shift: None,
            verbosity: 2,
            buffer_output: 1,
        }
    }
}

/// Rename detection level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenameDetection {
    /// No rename detection at all.
    Off,
    /// Detect renames (the default).
    #[default]
    Renames,
    /// Requested copy detection; treated as `Renames`.
    Copies,
}

/// Directory-rename handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryRenames {
    /// Never infer directory renames.
    None,
    /// Infer them, but flag every path they relocate as a conflict.
    Conflict,
    /// Infer them and relocate paths cleanly (the default).
    #[default]
    True,
}

/// Forced content-merge resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeVariant {
    #[default]
    Normal,
    /// Resolve conflicting regions in favor of side 1.
    Ours,
    /// Resolve conflicting regions in favor of side 2.
    Theirs,
}

/// Conflict marker style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStyle {
    /// Show the two sides only (the default).
    #[default]
    Merge,
    /// Additionally show the base content between `|||||||` markers.
    Diff3,
}

/// Result of a merge operation.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The merged tree, written to the object store. Present even when the
    /// merge is unclean: conflicted paths hold their as-merged content.
    pub tree: ObjectId,
    /// Whether every path resolved without conflict.
    pub clean: bool,
    /// Unmerged entries, sorted by path. Consumable without an index: each
    /// carries the three staged versions and their side-specific paths.
    pub conflicts: Vec<ConflictEntry>,
    /// Buffered diagnostics (only populated with `buffer_output == 2`).
    pub messages: String,
}

/// A path the merge could not resolve cleanly.
#[derive(Debug, Clone)]
pub struct ConflictEntry {
    /// Path in the merged tree.
    pub path: BString,
    /// Classification of the conflict.
    pub conflict_type: ConflictType,
    /// Base (stage 1) version, if the base had the path.
    pub base: Option<ConflictSide>,
    /// Side 1 (stage 2) version.
    pub ours: Option<ConflictSide>,
    /// Side 2 (stage 3) version.
    pub theirs: Option<ConflictSide>,
}

/// One staged version of a conflicted path.
#[derive(Debug, Clone)]
pub struct ConflictSide {
    pub oid: ObjectId,
    pub mode: FileMode,
    /// Path on that side; differs from the entry path after a rename.
    pub path: BString,
}

/// Kinds of per-path conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    /// Both sides changed the same content region.
    Content,
    /// One side modified, the other deleted.
    ModifyDelete,
    /// Both sides added different content at one path.
    AddAdd,
    /// Both sides renamed one path to different targets.
    RenameRename,
    /// One side renamed onto a path the other side added.
    RenameAdd,
    /// A file collided with a directory and was relocated.
    DirectoryFile,
    /// A directory was renamed to several places with no majority.
    DirectoryRenameSplit,
    /// A path was relocated by an inferred directory rename under the
    /// `Conflict` policy.
    FileLocation,
    /// The sides disagree on the object type (file vs symlink vs submodule).
    TypeChange,
    /// A submodule pointer the submodule merger could not resolve.
    Submodule,
}

/// Outcome of merging one submodule pointer.
#[derive(Debug, Clone)]
pub enum SubmoduleResolution {
    /// The merger found a unique resolution.
    Resolved(ObjectId),
    /// No unique resolution; an optional candidate the user might accept.
    Unresolved { suggestion: Option<ObjectId> },
}

/// Collaborator resolving submodule (gitlink) three-way merges, typically by
/// walking the submodule's history.
pub trait SubmoduleMerger {
    /// Merge the pointers at `path`. `search_for_merges` is false during
    /// recursive base merges, where suggestion hunting is pointless.
    fn merge(
        &self,
        path: &BStr,
        base: ObjectId,
        ours: ObjectId,
        theirs: ObjectId,
        search_for_merges: bool,
    ) -> SubmoduleResolution;
}

/// Default submodule merger for environments without access to submodule
/// history: every nontrivial pointer merge stays unresolved.
#[derive(Debug, Default)]
pub struct NoHistorySubmoduleMerger;

impl SubmoduleMerger for NoHistorySubmoduleMerger {
    fn merge(
        &self,
        _path: &BStr,
        _base: ObjectId,
        _ours: ObjectId,
        _theirs: ObjectId,
        _search_for_merges: bool,
    ) -> SubmoduleResolution {
        SubmoduleResolution::Unresolved { suggestion: None }
    }
}

/// Optional collaborator that applies a merge result to a working copy and
/// index. The engine itself never touches either.
pub trait WorktreeUpdater {
    fn apply(&mut self, result_tree: &ObjectId, conflicts: &[ConflictEntry])
        -> Result<(), MergeError>;
}

/// Errors produced by merge operations.
///
/// Any error aborts the merge; partial engine state is discarded and must
/// not be consumed.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("expected {expected} object, got {actual} for {oid}")]
    UnexpectedObjectType {
        oid: ObjectId,
        expected: &'static str,
        actual: String,
    },

    #[error("invalid merge options: {0}")]
    InvalidOptions(&'static str),

    #[error("merge invariant violated: {0}")]
    Internal(&'static str),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Odb(#[from] OdbError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = MergeOptions::default();
        assert_eq!(opts.detect_renames, RenameDetection::Renames);
        assert_eq!(opts.detect_directory_renames, DirectoryRenames::True);
        assert_eq!(opts.rename_limit, 1000);
        assert_eq!(opts.rename_score, 50);
        assert_eq!(opts.recursive_variant, MergeVariant::Normal);
        assert_eq!(opts.conflict_style, ConflictStyle::Merge);
        assert_eq!(opts.branch1, "HEAD");
        assert!(opts.ancestor.is_none());
    }

    #[test]
    fn no_history_submodule_merger_stays_unresolved() {
        let merger = NoHistorySubmoduleMerger;
        let result = merger.merge(
            BStr::new("sub"),
            ObjectId::Sha1([1; 20]),
            ObjectId::Sha1([2; 20]),
            ObjectId::Sha1([3; 20]),
            true,
        );
        assert!(matches!(
            result,
            SubmoduleResolution::Unresolved { suggestion: None }
        ));
    }
}
