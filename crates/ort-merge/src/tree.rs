//! Bottom-up tree writing.
//!
//! The resolver sweeps the path table in reverse lexicographic order, so
//! within any directory all children are visited before the directory's own
//! entry. Resolved children accumulate as (basename, version) pairs under a
//! stack of open directory frames; when the sweep leaves a directory, its
//! slice of the accumulator becomes a tree object in the store and the
//! directory collapses to a single pair in its parent's frame. Frame
//! boundaries are found by pointer identity of interned directory names,
//! never by comparing bytes.

use std::rc::Rc;

use bstr::{BString, ByteSlice};
use ort_hash::ObjectId;
use ort_object::{FileMode, Object, Tree, TreeEntry};
use ort_odb::ObjectStore;

use crate::engine::Engine;
use crate::entry::{Entry, VersionInfo};
use crate::MergeError;

/// The accumulator and frame stack for one sweep.
pub(crate) struct DirectoryVersions {
    /// (basename, version) pairs of resolved entries, grouped by frame.
    pub(crate) versions: Vec<(BString, VersionInfo)>,
    /// Open frames: directory path and the offset into `versions` where its
    /// children start.
    pub(crate) offsets: Vec<(Rc<BString>, usize)>,
    last_directory: Option<Rc<BString>>,
}

impl DirectoryVersions {
    pub(crate) fn new() -> Self {
        Self {
            versions: Vec::new(),
            offsets: Vec::new(),
            last_directory: None,
        }
    }
}

impl Engine<'_> {
    /// React to the sweep reaching an entry whose containing directory is
    /// `new_dir`: open a frame when descending, or close the finished frame
    /// and record its subtree when ascending.
    pub(crate) fn write_completed_directories(
        &mut self,
        new_dir: &Rc<BString>,
        md: &mut DirectoryVersions,
    ) -> Result<(), MergeError> {
        if md
            .last_directory
            .as_ref()
            .is_some_and(|last| Rc::ptr_eq(last, new_dir))
        {
            return Ok(());
        }

        // Descending: the previous directory is a prefix of the new one
        // (or the sweep just started).
        let descending = match &md.last_directory {
            None => true,
            Some(last) => new_dir.starts_with(last.as_slice()),
        };
        if descending {
            md.offsets.push((new_dir.clone(), md.versions.len()));
            md.last_directory = Some(new_dir.clone());
            return Ok(());
        }

        // Ascending: the innermost frame is complete.
        let last = md
            .last_directory
            .clone()
            .ok_or(MergeError::Internal("tree writer has no open frame"))?;
        let (frame_dir, offset) = md
            .offsets
            .pop()
            .ok_or(MergeError::Internal("tree writer frame stack is empty"))?;
        debug_assert!(Rc::ptr_eq(&frame_dir, &last));

        let entry = self
            .paths
            .get_mut(last.as_ref())
            .ok_or(MergeError::Internal("closed directory missing from path table"))?;
        let merged = entry.merged_mut();
        let dir_version = if offset == md.versions.len() {
            // Everything under the directory vanished.
            merged.result = None;
            None
        } else {
            let oid = write_tree(self.store, &md.versions[offset..])?;
            let version = VersionInfo {
                mode: FileMode::Tree,
                oid,
            };
            merged.result = Some(version);
            Some(version)
        };
        md.versions.truncate(offset);

        // The parent frame may not exist yet when the sweep skipped levels.
        let parent_open = md
            .offsets
            .last()
            .is_some_and(|(dir, _)| Rc::ptr_eq(dir, new_dir));
        if !parent_open {
            md.offsets.push((new_dir.clone(), md.versions.len()));
        }
        if let Some(version) = dir_version {
            let basename = match last.rfind_byte(b'/') {
                Some(pos) => BString::from(&last[pos + 1..]),
                None => last.as_ref().clone(),
            };
            md.versions.push((basename, version));
        }
        md.last_directory = Some(new_dir.clone());
        Ok(())
    }
}

/// Append one resolved path to its directory's pending entries. Null
/// resolutions vanish; unresolved directory placeholders were recorded when
/// their frame closed.
pub(crate) fn record_entry_for_tree(
    md: &mut DirectoryVersions,
    path: &BString,
    entry: &Entry,
) {
    let merged = entry.merged();
    let Some(version) = merged.result else {
        return;
    };
    if !merged.clean {
        if let Some(ci) = entry.conflict() {
            if ci.filemask == 0 {
                return;
            }
        }
    }
    let basename = BString::from(&path[merged.basename_offset..]);
    md.versions.push((basename, version));
}

/// Write one directory's accumulated entries as a tree object.
pub(crate) fn write_tree(
    store: &dyn ObjectStore,
    entries: &[(BString, VersionInfo)],
) -> Result<ObjectId, MergeError> {
    let tree = Tree {
        entries: entries
            .iter()
            .map(|(name, version)| TreeEntry {
                mode: version.mode,
                name: name.clone(),
                oid: version.oid,
            })
            .collect(),
    };
    Ok(store.write(&Object::Tree(tree))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ort_odb::MemoryStore;

    #[test]
    fn empty_entry_list_writes_the_empty_tree() {
        let store = MemoryStore::new();
        let oid = write_tree(&store, &[]).unwrap();
        assert_eq!(oid.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn entries_are_written_in_canonical_order() {
        let store = MemoryStore::new();
        let file = VersionInfo {
            mode: FileMode::Regular,
            oid: ObjectId::Sha1([1; 20]),
        };
        let forward = write_tree(
            &store,
            &[(BString::from("a"), file), (BString::from("b"), file)],
        )
        .unwrap();
        let backward = write_tree(
            &store,
            &[(BString::from("b"), file), (BString::from("a"), file)],
        )
        .unwrap();
        assert_eq!(forward, backward);
    }
}
