//! Tree-to-tree diff.
//!
//! Walks two trees in parallel over their canonical entry order and emits a
//! flat list of file pairs with root-relative paths, recursing into nested
//! trees. A tree replaced by a blob (or vice versa) decomposes into a
//! delete of everything under the tree plus an add of the blob.

use bstr::BString;
use ort_hash::ObjectId;
use ort_object::{Object, Tree, TreeEntry};
use ort_odb::ObjectStore;

use crate::rename::detect_renames;
use crate::{DiffError, DiffOptions, DiffResult, FilePair, FileStatus};

/// Diff two trees, producing file-level changes.
///
/// `None` stands for the empty tree. When `options.detect_renames` is set,
/// delete/add pairs are folded into renames before returning.
pub fn diff_trees(
    store: &dyn ObjectStore,
    old_tree: Option<&ObjectId>,
    new_tree: Option<&ObjectId>,
    options: &DiffOptions,
) -> Result<DiffResult, DiffError> {
    let old = match old_tree {
        Some(oid) => read_tree(store, oid)?,
        None => Tree::new(),
    };
    let new = match new_tree {
        Some(oid) => read_tree(store, oid)?,
        None => Tree::new(),
    };

    let mut result = DiffResult::default();
    diff_entries(store, &old.entries, &new.entries, &BString::from(""), &mut result.files)?;

    if options.detect_renames {
        detect_renames(store, &mut result, options.rename_threshold, options.rename_limit)?;
    }

    Ok(result)
}

/// Read and parse a tree object.
pub fn read_tree(store: &dyn ObjectStore, oid: &ObjectId) -> Result<Tree, DiffError> {
    match store.read(oid)? {
        Some(Object::Tree(tree)) => Ok(tree),
        Some(other) => Err(DiffError::UnexpectedObjectType {
            oid: *oid,
            expected: "tree",
            actual: other.object_type().to_string(),
        }),
        None => Err(DiffError::ObjectNotFound(*oid)),
    }
}

/// Read blob bytes. A null id reads as empty, matching how an absent side
/// of a file pair behaves.
pub fn read_blob(store: &dyn ObjectStore, oid: &ObjectId) -> Result<Vec<u8>, DiffError> {
    if oid.is_null() {
        return Ok(Vec::new());
    }
    match store.read(oid)? {
        Some(Object::Blob(blob)) => Ok(blob.data),
        Some(other) => Err(DiffError::UnexpectedObjectType {
            oid: *oid,
            expected: "blob",
            actual: other.object_type().to_string(),
        }),
        None => Err(DiffError::ObjectNotFound(*oid)),
    }
}

fn full_path(prefix: &BString, name: &BString) -> BString {
    if prefix.is_empty() {
        name.clone()
    } else {
        let mut p = prefix.clone();
        p.push(b'/');
        p.extend_from_slice(name);
        p
    }
}

/// Recursively diff two sorted entry lists.
fn diff_entries(
    store: &dyn ObjectStore,
    old_entries: &[TreeEntry],
    new_entries: &[TreeEntry],
    prefix: &BString,
    files: &mut Vec<FilePair>,
) -> Result<(), DiffError> {
    let mut oi = 0;
    let mut ni = 0;

    while oi < old_entries.len() || ni < new_entries.len() {
        match (old_entries.get(oi), new_entries.get(ni)) {
            (Some(old_entry), Some(new_entry)) => {
                match TreeEntry::cmp_entries(old_entry, new_entry) {
                    std::cmp::Ordering::Less => {
                        emit_deleted(store, old_entry, prefix, files)?;
                        oi += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        emit_added(store, new_entry, prefix, files)?;
                        ni += 1;
                    }
                    std::cmp::Ordering::Equal => {
                        if old_entry.oid != new_entry.oid || old_entry.mode != new_entry.mode {
                            emit_changed(store, old_entry, new_entry, prefix, files)?;
                        }
                        oi += 1;
                        ni += 1;
                    }
                }
            }
            (Some(old_entry), None) => {
                emit_deleted(store, old_entry, prefix, files)?;
                oi += 1;
            }
            (None, Some(new_entry)) => {
                emit_added(store, new_entry, prefix, files)?;
                ni += 1;
            }
            (None, None) => break,
        }
    }

    Ok(())
}

fn emit_deleted(
    store: &dyn ObjectStore,
    entry: &TreeEntry,
    prefix: &BString,
    files: &mut Vec<FilePair>,
) -> Result<(), DiffError> {
    let path = full_path(prefix, &entry.name);
    if entry.mode.is_tree() {
        let tree = read_tree(store, &entry.oid)?;
        diff_entries(store, &tree.entries, &[], &path, files)?;
    } else {
        files.push(FilePair {
            status: FileStatus::Deleted,
            old_path: Some(path),
            new_path: None,
            old_mode: Some(entry.mode),
            new_mode: None,
            old_oid: Some(entry.oid),
            new_oid: None,
            similarity: None,
        });
    }
    Ok(())
}

fn emit_added(
    store: &dyn ObjectStore,
    entry: &TreeEntry,
    prefix: &BString,
    files: &mut Vec<FilePair>,
) -> Result<(), DiffError> {
    let path = full_path(prefix, &entry.name);
    if entry.mode.is_tree() {
        let tree = read_tree(store, &entry.oid)?;
        diff_entries(store, &[], &tree.entries, &path, files)?;
    } else {
        files.push(FilePair {
            status: FileStatus::Added,
            old_path: None,
            new_path: Some(path),
            old_mode: None,
            new_mode: Some(entry.mode),
            old_oid: None,
            new_oid: Some(entry.oid),
            similarity: None,
        });
    }
    Ok(())
}

fn emit_changed(
    store: &dyn ObjectStore,
    old_entry: &TreeEntry,
    new_entry: &TreeEntry,
    prefix: &BString,
    files: &mut Vec<FilePair>,
) -> Result<(), DiffError> {
    let path = full_path(prefix, &old_entry.name);
    let old_is_tree = old_entry.mode.is_tree();
    let new_is_tree = new_entry.mode.is_tree();

    if old_is_tree && new_is_tree {
        let old_tree = read_tree(store, &old_entry.oid)?;
        let new_tree = read_tree(store, &new_entry.oid)?;
        diff_entries(store, &old_tree.entries, &new_tree.entries, &path, files)?;
    } else if old_is_tree {
        // Tree replaced by a file.
        let old_tree = read_tree(store, &old_entry.oid)?;
        diff_entries(store, &old_tree.entries, &[], &path, files)?;
        files.push(FilePair {
            status: FileStatus::Added,
            old_path: None,
            new_path: Some(path),
            old_mode: None,
            new_mode: Some(new_entry.mode),
            old_oid: None,
            new_oid: Some(new_entry.oid),
            similarity: None,
        });
    } else if new_is_tree {
        // File replaced by a tree.
        files.push(FilePair {
            status: FileStatus::Deleted,
            old_path: Some(path.clone()),
            new_path: None,
            old_mode: Some(old_entry.mode),
            new_mode: None,
            old_oid: Some(old_entry.oid),
            new_oid: None,
            similarity: None,
        });
        let new_tree = read_tree(store, &new_entry.oid)?;
        diff_entries(store, &[], &new_tree.entries, &path, files)?;
    } else {
        let status = if old_entry.mode.is_compatible_with(new_entry.mode) {
            FileStatus::Modified
        } else {
            FileStatus::TypeChanged
        };
        files.push(FilePair {
            status,
            old_path: Some(path.clone()),
            new_path: Some(path),
            old_mode: Some(old_entry.mode),
            new_mode: Some(new_entry.mode),
            old_oid: Some(old_entry.oid),
            new_oid: Some(new_entry.oid),
            similarity: None,
        });
    }

    Ok(())
}
