//! Tree-to-tree diff and rename detection.
//!
//! Produces the flat file-pair lists the merge engine consumes: one entry
//! per changed path between a merge base and one side, with renames folded
//! in by exact and similarity matching. Also hosts the Myers line diff used
//! by both the similarity scorer and the merge's content merger.

pub mod algorithm;
pub mod rename;
pub mod tree;

use bstr::BString;
use ort_hash::ObjectId;
use ort_object::FileMode;

/// Options controlling a tree diff.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Whether to convert delete/add pairs into renames.
    pub detect_renames: bool,
    /// Similarity threshold for rename detection (0-100).
    pub rename_threshold: u8,
    /// Guard on the quadratic similarity pass: if either the delete or the
    /// add list is longer than this, only exact (same-id) renames are found.
    pub rename_limit: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            detect_renames: false,
            rename_threshold: 50,
            rename_limit: 1000,
        }
    }
}

/// Line-diff algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffAlgorithm {
    /// Myers O(ND) with common-affix trimming (default).
    #[default]
    Myers,
    /// Myers without shortcuts; always the minimum edit script.
    Minimal,
}

/// Result of diffing two trees.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    /// Per-file change entries.
    pub files: Vec<FilePair>,
    /// Largest rename-list length that exceeded `rename_limit`, if the
    /// similarity pass was skipped; zero otherwise.
    pub needed_rename_limit: usize,
}

impl DiffResult {
    /// True if no files changed.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// One changed file between two trees.
#[derive(Debug, Clone)]
pub struct FilePair {
    /// Kind of change.
    pub status: FileStatus,
    /// Path in the old tree (None for added files).
    pub old_path: Option<BString>,
    /// Path in the new tree (None for deleted files).
    pub new_path: Option<BString>,
    /// Mode in the old tree.
    pub old_mode: Option<FileMode>,
    /// Mode in the new tree.
    pub new_mode: Option<FileMode>,
    /// Object id in the old tree.
    pub old_oid: Option<ObjectId>,
    /// Object id in the new tree.
    pub new_oid: Option<ObjectId>,
    /// Similarity percentage for renames (100 for exact matches).
    pub similarity: Option<u8>,
}

impl FilePair {
    /// The path this pair is about (new side preferred).
    pub fn path(&self) -> &BString {
        self.new_path
            .as_ref()
            .or(self.old_path.as_ref())
            .expect("file pair carries at least one path")
    }
}

/// File-level change status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    TypeChanged,
}

impl FileStatus {
    /// Single-letter status code.
    pub fn as_char(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Deleted => 'D',
            Self::Modified => 'M',
            Self::Renamed => 'R',
            Self::TypeChanged => 'T',
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Errors produced by diff operations.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("expected {expected} object, got {actual} for {oid}")]
    UnexpectedObjectType {
        oid: ObjectId,
        expected: &'static str,
        actual: String,
    },

    #[error(transparent)]
    Odb(#[from] ort_odb::OdbError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = DiffOptions::default();
        assert!(!opts.detect_renames);
        assert_eq!(opts.rename_threshold, 50);
        assert_eq!(opts.rename_limit, 1000);
    }

    #[test]
    fn status_letters() {
        assert_eq!(FileStatus::Added.as_char(), 'A');
        assert_eq!(FileStatus::Renamed.as_char(), 'R');
        assert_eq!(FileStatus::TypeChanged.to_string(), "T");
    }

    #[test]
    fn pair_path_prefers_new_side() {
        let pair = FilePair {
            status: FileStatus::Renamed,
            old_path: Some(BString::from("old")),
            new_path: Some(BString::from("new")),
            old_mode: None,
            new_mode: None,
            old_oid: None,
            new_oid: None,
            similarity: Some(100),
        };
        assert_eq!(pair.path(), "new");
    }
}
