//! The path table's per-path records.
//!
//! Every path the three-tree walk touches gets exactly one [`Entry`]:
//! either already resolved ([`MergedInfo`]) or provisional/conflicted
//! ([`ConflictInfo`], which embeds the `MergedInfo` it will resolve into).
//! Paths and directory names are reference-counted byte strings; a
//! directory name handle is always a clone of the directory's own table
//! key, so `Rc::ptr_eq` on `directory_name` is equivalent to byte equality.
//! The tree writer relies on that to find subtree boundaries without
//! comparing bytes, and renamed entries may alias a removed key's string
//! without any lifetime bookkeeping.

use std::rc::Rc;

use bstr::BString;
use ort_hash::ObjectId;
use ort_object::FileMode;

use crate::ConflictType;

/// One object at one position: a mode and a content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub mode: FileMode,
    pub oid: ObjectId,
}

/// The resolved form of a path.
#[derive(Debug, Clone)]
pub struct MergedInfo {
    /// The merged version, or `None` when the path resolves to nothing
    /// (deleted, or a directory whose contents all vanished).
    pub result: Option<VersionInfo>,
    /// Handle to the containing directory's path-table key. Pointer
    /// identity is string equality; see the module docs.
    pub directory_name: Rc<BString>,
    /// Offset of the basename within the full path.
    pub basename_offset: usize,
    /// True once the engine resolved this path without raising a conflict.
    pub clean: bool,
}

impl MergedInfo {
    /// A clean resolution.
    pub fn resolved(
        result: Option<VersionInfo>,
        directory_name: Rc<BString>,
        basename_offset: usize,
    ) -> Self {
        Self {
            result,
            directory_name,
            basename_offset,
            clean: true,
        }
    }

    /// Whether this path resolved to nothing.
    pub fn is_null(&self) -> bool {
        self.result.is_none()
    }
}

/// A provisional or conflicted path.
///
/// Indices 0/1/2 of `stages` and `pathnames` are base, side 1, side 2.
/// `filemask` bit *i* means position *i* holds a non-directory; `dirmask`
/// bit *i* means a directory. A bit is never set in both.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub merged: MergedInfo,
    pub stages: [Option<VersionInfo>; 3],
    /// Path of each version; differs from the table key after a rename.
    pub pathnames: [Rc<BString>; 3],
    /// A file here collided with a directory on another side.
    pub df_conflict: bool,
    /// The path itself is disputed (rename/rename, forced relocation).
    pub path_conflict: bool,
    pub filemask: u8,
    pub dirmask: u8,
    /// Which pairs were byte-identical at collection: 3 = base/side1,
    /// 5 = base/side2, 6 = side1/side2, 0 = none.
    pub match_mask: u8,
    /// Guard against double resolution.
    pub processed: bool,
    /// Classification hint for reporting, set by the stage that noticed
    /// the conflict.
    pub kind: Option<ConflictType>,
}

impl ConflictInfo {
    /// A fresh provisional record with no version information yet.
    pub fn new(path: Rc<BString>, directory_name: Rc<BString>, basename_offset: usize) -> Self {
        Self {
            merged: MergedInfo {
                result: None,
                directory_name,
                basename_offset,
                clean: false,
            },
            stages: [None, None, None],
            pathnames: [path.clone(), path.clone(), path],
            df_conflict: false,
            path_conflict: false,
            filemask: 0,
            dirmask: 0,
            match_mask: 0,
            processed: false,
            kind: None,
        }
    }

    /// Mark this entry resolved by removal (e.g. the source of a rename).
    pub fn resolve_by_removal(&mut self) {
        self.merged.result = None;
        self.merged.clean = true;
    }
}

/// A path-table record: resolved, or provisional/conflicted.
///
/// The parent project discriminates a single allocation via its `clean`
/// bit; the sum type keeps the same two shapes without the narrowing
/// hazard.
#[derive(Debug, Clone)]
pub enum Entry {
    Resolved(MergedInfo),
    Conflicted(Box<ConflictInfo>),
}

impl Entry {
    /// The resolution-in-progress, whichever shape holds it.
    pub fn merged(&self) -> &MergedInfo {
        match self {
            Entry::Resolved(m) => m,
            Entry::Conflicted(c) => &c.merged,
        }
    }

    pub fn merged_mut(&mut self) -> &mut MergedInfo {
        match self {
            Entry::Resolved(m) => m,
            Entry::Conflicted(c) => &mut c.merged,
        }
    }

    /// Whether this entry already has a clean resolution.
    pub fn is_clean(&self) -> bool {
        self.merged().clean
    }

    pub fn conflict(&self) -> Option<&ConflictInfo> {
        match self {
            Entry::Resolved(_) => None,
            Entry::Conflicted(c) => Some(c),
        }
    }

    pub fn conflict_mut(&mut self) -> Option<&mut ConflictInfo> {
        match self {
            Entry::Resolved(_) => None,
            Entry::Conflicted(c) => Some(c),
        }
    }
}
