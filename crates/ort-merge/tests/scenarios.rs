//! End-to-end merge scenarios over a memory store.

use std::collections::BTreeMap;

use bstr::{BString, ByteSlice};
use ort_hash::ObjectId;
use ort_merge::{
    merge_trees, ConflictType, DirectoryRenames, MergeOptions, MergeResult, RenameDetection,
};
use ort_object::{Blob, FileMode, Object, Tree, TreeEntry};
use ort_odb::{MemoryStore, ObjectStore};

fn blob(store: &MemoryStore, content: &[u8]) -> ObjectId {
    store
        .write(&Object::Blob(Blob::new(content.to_vec())))
        .unwrap()
}

fn make_tree(store: &MemoryStore, files: &[(&str, &[u8])]) -> ObjectId {
    let entries: Vec<(BString, ObjectId, FileMode)> = files
        .iter()
        .map(|(path, content)| (BString::from(*path), blob(store, content), FileMode::Regular))
        .collect();
    make_tree_level(store, &entries)
}

fn make_tree_level(store: &MemoryStore, entries: &[(BString, ObjectId, FileMode)]) -> ObjectId {
    let mut direct: Vec<TreeEntry> = Vec::new();
    let mut subdirs: BTreeMap<BString, Vec<(BString, ObjectId, FileMode)>> = BTreeMap::new();
    for (path, oid, mode) in entries {
        if let Some(pos) = path.find_byte(b'/') {
            subdirs
                .entry(BString::from(&path[..pos]))
                .or_default()
                .push((BString::from(&path[pos + 1..]), *oid, *mode));
        } else {
            direct.push(TreeEntry {
                mode: *mode,
                name: path.clone(),
                oid: *oid,
            });
        }
    }
    for (name, sub) in subdirs {
        let oid = make_tree_level(store, &sub);
        direct.push(TreeEntry {
            mode: FileMode::Tree,
            name,
            oid,
        });
    }
    store.write(&Object::Tree(Tree { entries: direct })).unwrap()
}

/// Flatten a result tree into path → (mode, oid).
fn flatten(store: &MemoryStore, tree: &ObjectId) -> BTreeMap<String, (FileMode, ObjectId)> {
    let mut out = BTreeMap::new();
    flatten_into(store, tree, "", &mut out);
    out
}

fn flatten_into(
    store: &MemoryStore,
    tree: &ObjectId,
    prefix: &str,
    out: &mut BTreeMap<String, (FileMode, ObjectId)>,
) {
    let Some(Object::Tree(tree)) = store.read(tree).unwrap() else {
        panic!("missing tree object");
    };
    for entry in &tree.entries {
        let path = if prefix.is_empty() {
            entry.name.to_string()
        } else {
            format!("{}/{}", prefix, entry.name)
        };
        if entry.mode.is_tree() {
            flatten_into(store, &entry.oid, &path, out);
        } else {
            out.insert(path, (entry.mode, entry.oid));
        }
    }
}

fn blob_content(store: &MemoryStore, oid: &ObjectId) -> Vec<u8> {
    match store.read(oid).unwrap() {
        Some(Object::Blob(blob)) => blob.data,
        other => panic!("expected blob, got {:?}", other),
    }
}

fn quiet_options() -> MergeOptions {
    MergeOptions {
        buffer_output: 2,
        ..MergeOptions::default()
    }
}

fn merge(
    store: &MemoryStore,
    base: &ObjectId,
    side1: &ObjectId,
    side2: &ObjectId,
) -> MergeResult {
    merge_trees(store, base, side1, side2, &quiet_options()).unwrap()
}

#[test]
fn scenario_trivial_no_change() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[("a", b"one\n"), ("b", b"two\n")]);

    let result = merge(&store, &base, &base, &base);
    assert!(result.clean);
    assert!(result.conflicts.is_empty());
    assert_eq!(result.tree, base);
}

#[test]
fn scenario_independent_edit_fast_forwards() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[("a", b"one\n")]);
    let side1 = make_tree(&store, &[("a", b"two\n")]);

    let result = merge(&store, &base, &side1, &base);
    assert!(result.clean);
    assert_eq!(result.tree, side1);

    let mirrored = merge(&store, &base, &base, &side1);
    assert!(mirrored.clean);
    assert_eq!(mirrored.tree, side1);
}

#[test]
fn scenario_content_conflict() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[("a", b"line\nbase\n")]);
    let side1 = make_tree(&store, &[("a", b"line\nours\n")]);
    let side2 = make_tree(&store, &[("a", b"line\ntheirs\n")]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(!result.clean);
    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.path, "a");
    assert_eq!(conflict.conflict_type, ConflictType::Content);
    assert!(conflict.base.is_some());
    assert!(conflict.ours.is_some());
    assert!(conflict.theirs.is_some());

    // The result tree holds the as-merged content, markers included.
    let files = flatten(&store, &result.tree);
    let merged = blob_content(&store, &files["a"].1);
    let text = String::from_utf8_lossy(&merged);
    assert!(text.contains("<<<<<<< HEAD"));
    assert!(text.contains(">>>>>>> merge"));
}

#[test]
fn scenario_modify_delete() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[("a", b"alpha\nbeta\ngamma\n")]);
    let side1 = make_tree(&store, &[("a", b"alpha\nBETA\ngamma\n")]);
    let side2 = make_tree(&store, &[] as &[(&str, &[u8])]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(!result.clean);
    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.path, "a");
    assert_eq!(conflict.conflict_type, ConflictType::ModifyDelete);
    assert!(conflict.base.is_some());
    assert!(conflict.ours.is_some());
    assert!(conflict.theirs.is_none());

    // The surviving side's version stays in the tree.
    let files = flatten(&store, &result.tree);
    assert_eq!(blob_content(&store, &files["a"].1), b"alpha\nBETA\ngamma\n");
}

#[test]
fn scenario_plain_rename_with_edit() {
    let store = MemoryStore::new();
    let content = b"fn work() {\n    done();\n}\n";
    let edited = b"fn work() {\n    redone();\n}\n";
    let base = make_tree(&store, &[("dir/a", content)]);
    let side1 = make_tree(&store, &[("dir/b", content)]);
    let side2 = make_tree(&store, &[("dir/a", edited)]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(result.clean, "messages: {}", result.messages);
    let files = flatten(&store, &result.tree);
    assert_eq!(files.len(), 1);
    assert_eq!(blob_content(&store, &files["dir/b"].1), edited);
}

#[test]
fn scenario_directory_rename_carries_new_file() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[("old/a", b"aaa\n"), ("old/b", b"bbb\n")]);
    let side1 = make_tree(&store, &[("new/a", b"aaa\n"), ("new/b", b"bbb\n")]);
    let side2 = make_tree(
        &store,
        &[("old/a", b"aaa\n"), ("old/b", b"bbb\n"), ("old/c", b"ccc\n")],
    );

    let result = merge(&store, &base, &side1, &side2);
    assert!(result.clean, "messages: {}", result.messages);
    let files = flatten(&store, &result.tree);
    let paths: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(paths, vec!["new/a", "new/b", "new/c"]);
    assert_eq!(blob_content(&store, &files["new/c"].1), b"ccc\n");
}

#[test]
fn scenario_rename_rename_one_to_two() {
    let store = MemoryStore::new();
    let content = b"shared content\nwith lines\n";
    let base = make_tree(&store, &[("a", content)]);
    let side1 = make_tree(&store, &[("b", content)]);
    let side2 = make_tree(&store, &[("c", content)]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(!result.clean);

    let conflict_paths: Vec<String> = result
        .conflicts
        .iter()
        .map(|c| c.path.to_string())
        .collect();
    assert_eq!(conflict_paths, vec!["b", "c"]);
    for conflict in &result.conflicts {
        assert_eq!(conflict.conflict_type, ConflictType::RenameRename);
    }

    // The source is resolved by removal; both targets stay in the tree.
    let files = flatten(&store, &result.tree);
    let paths: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(paths, vec!["b", "c"]);
}

#[test]
fn scenario_directory_file_conflict_relocates() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[("a", b"base file\n")]);
    let side1 = make_tree(&store, &[("a/x", b"nested\n")]);
    let side2 = make_tree(&store, &[("a", b"their file, quite different\n")]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(!result.clean);

    let files = flatten(&store, &result.tree);
    let paths: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(paths, vec!["a/x", "a~merge"]);
    assert_eq!(
        blob_content(&store, &files["a~merge"].1),
        b"their file, quite different\n"
    );

    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.path, "a~merge");
    assert_eq!(conflict.conflict_type, ConflictType::DirectoryFile);
    // The staged versions keep their original path.
    assert_eq!(conflict.base.as_ref().unwrap().path, "a");
    assert_eq!(conflict.theirs.as_ref().unwrap().path, "a");
    assert!(conflict.ours.is_none());
}

#[test]
fn add_add_same_content_is_clean() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[] as &[(&str, &[u8])]);
    let side1 = make_tree(&store, &[("new", b"same\n")]);
    let side2 = make_tree(&store, &[("new", b"same\n")]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(result.clean);
    assert_eq!(result.tree, side1);
}

#[test]
fn add_add_different_content_conflicts() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[] as &[(&str, &[u8])]);
    let side1 = make_tree(&store, &[("new", b"ours\n")]);
    let side2 = make_tree(&store, &[("new", b"theirs\n")]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(!result.clean);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].conflict_type, ConflictType::AddAdd);
    assert!(result.conflicts[0].base.is_none());
}

#[test]
fn rename_add_merges_content_and_conflicts() {
    let store = MemoryStore::new();
    let moved = b"line one\nline two\nline three\nline four\n";
    let touched = b"line one\nline two\nline three\nline four\nline five\n";
    let base = make_tree(&store, &[("src", moved)]);
    // Side 1 renames src -> dst; side 2 edits src in place and also adds an
    // unrelated dst.
    let side1 = make_tree(&store, &[("dst", moved)]);
    let side2 = make_tree(&store, &[("src", touched), ("dst", b"unrelated addition\n")]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(!result.clean);
    assert!(result
        .conflicts
        .iter()
        .any(|c| c.path == "dst" && c.conflict_type == ConflictType::RenameAdd));
    // src is resolved by removal; the battle is at dst.
    let files = flatten(&store, &result.tree);
    assert!(!files.contains_key("src"));
    assert!(files.contains_key("dst"));
}

#[test]
fn rename_delete_keeps_renamed_side() {
    let store = MemoryStore::new();
    let content = b"alpha\nbravo\ncharlie\n";
    let base = make_tree(&store, &[("keep", b"steady\n"), ("src", content)]);
    let side1 = make_tree(&store, &[("keep", b"steady\n"), ("dst", content)]);
    let side2 = make_tree(&store, &[("keep", b"steady\n")]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(!result.clean);
    // The renamed file survives at its new path as a modify/delete-style
    // conflict.
    let files = flatten(&store, &result.tree);
    assert!(files.contains_key("dst"));
    assert!(!files.contains_key("src"));
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].path, "dst");
}

#[test]
fn transitive_directory_rename_follows_the_bulk() {
    // Base: dumbdir/afile, otherdir/bfile
    // Side 1: renames dumbdir -> smrtdir
    // Side 2: merges otherdir into dumbdir
    // bfile must follow the chain and end up in smrtdir.
    let store = MemoryStore::new();
    let afile = b"contents of afile\nwith another line\n";
    let bfile = b"contents of bfile\nalso two lines\n";
    let base = make_tree(&store, &[("dumbdir/afile", afile), ("otherdir/bfile", bfile)]);
    let side1 = make_tree(&store, &[("smrtdir/afile", afile), ("otherdir/bfile", bfile)]);
    let side2 = make_tree(&store, &[("dumbdir/afile", afile), ("dumbdir/bfile", bfile)]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(result.clean, "messages: {}", result.messages);
    let files = flatten(&store, &result.tree);
    let paths: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(paths, vec!["smrtdir/afile", "smrtdir/bfile"]);
}

#[test]
fn directory_rename_exclusion_when_both_sides_rename_the_source() {
    // Both sides rename foo, to different places; side 2 also adds a new
    // file under foo. Side 1's foo -> bar1 must not be applied to side 2's
    // add, because side 2 is busy renaming foo itself.
    let store = MemoryStore::new();
    let a = b"file a body\nsecond line\n";
    let b = b"file b body\nsecond line\n";
    let base = make_tree(&store, &[("foo/a", a), ("foo/b", b)]);
    let side1 = make_tree(&store, &[("bar1/a", a), ("bar1/b", b)]);
    let side2 = make_tree(&store, &[("bar2/a", a), ("bar2/b", b), ("foo/new", b"fresh\n")]);

    let result = merge(&store, &base, &side1, &side2);
    assert!(!result.clean);
    assert!(result.messages.contains("WARNING: avoiding applying"));

    // The add stays at its original path instead of being dragged into
    // either rename target.
    let files = flatten(&store, &result.tree);
    assert!(files.contains_key("foo/new"));
    assert!(!files.contains_key("bar1/new"));
    assert!(!files.contains_key("bar2/new"));

    // Each renamed file is a rename/rename(1→2) conflict on both targets.
    let conflict_paths: Vec<String> = result
        .conflicts
        .iter()
        .map(|c| c.path.to_string())
        .collect();
    assert_eq!(conflict_paths, vec!["bar1/a", "bar1/b", "bar2/a", "bar2/b"]);
    assert!(result
        .conflicts
        .iter()
        .all(|c| c.conflict_type == ConflictType::RenameRename));
}

#[test]
fn directory_rename_collision_demotes_with_diagnostic() {
    // Side 2 adds both old/extra and new/extra; side 1 renames old -> new.
    // The implicit rename of old/extra would land on side 2's own
    // new/extra, so it is skipped with a diagnostic and the add stays put.
    let store = MemoryStore::new();
    let one = b"first file body\nspanning lines\n";
    let two = b"second file body\nspanning lines\n";
    let base = make_tree(&store, &[("old/one", one), ("old/two", two)]);
    let side1 = make_tree(&store, &[("new/one", one), ("new/two", two)]);
    let side2 = make_tree(
        &store,
        &[
            ("old/one", one),
            ("old/two", two),
            ("old/extra", b"incoming\n"),
            ("new/extra", b"occupied by theirs\n"),
        ],
    );

    let result = merge_trees(&store, &base, &side1, &side2, &quiet_options()).unwrap();
    assert!(!result.clean);
    assert!(result.messages.contains("implicit dir rename"));
    // Demoted, not conflicted: both adds resolve cleanly in place.
    assert!(result.conflicts.is_empty());
    let files = flatten(&store, &result.tree);
    assert!(files.contains_key("new/extra"));
    assert!(files.contains_key("old/extra"));
    assert!(files.contains_key("new/one"));
    assert!(files.contains_key("new/two"));
}

#[test]
fn directory_rename_conflict_policy_flags_relocations() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[("old/a", b"aaa\n"), ("old/b", b"bbb\n")]);
    let side1 = make_tree(&store, &[("new/a", b"aaa\n"), ("new/b", b"bbb\n")]);
    let side2 = make_tree(
        &store,
        &[("old/a", b"aaa\n"), ("old/b", b"bbb\n"), ("old/c", b"ccc\n")],
    );

    let opts = MergeOptions {
        detect_directory_renames: DirectoryRenames::Conflict,
        buffer_output: 2,
        ..MergeOptions::default()
    };
    let result = merge_trees(&store, &base, &side1, &side2, &opts).unwrap();
    assert!(!result.clean);
    assert!(result
        .conflicts
        .iter()
        .any(|c| c.path == "new/c" && c.conflict_type == ConflictType::FileLocation));
    // The file still lands at the renamed location.
    let files = flatten(&store, &result.tree);
    assert!(files.contains_key("new/c"));
}

#[test]
fn directory_renames_disabled_leaves_adds_in_place() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[("old/a", b"aaa\n"), ("old/b", b"bbb\n")]);
    let side1 = make_tree(&store, &[("new/a", b"aaa\n"), ("new/b", b"bbb\n")]);
    let side2 = make_tree(
        &store,
        &[("old/a", b"aaa\n"), ("old/b", b"bbb\n"), ("old/c", b"ccc\n")],
    );

    let opts = MergeOptions {
        detect_directory_renames: DirectoryRenames::None,
        buffer_output: 2,
        ..MergeOptions::default()
    };
    let result = merge_trees(&store, &base, &side1, &side2, &opts).unwrap();
    let files = flatten(&store, &result.tree);
    assert!(files.contains_key("old/c"));
    assert!(!files.contains_key("new/c"));
}

#[test]
fn renames_disabled_turns_rename_into_delete_plus_add() {
    let store = MemoryStore::new();
    let content = b"movable content\nof some length\n";
    let base = make_tree(&store, &[("a", content)]);
    let side1 = make_tree(&store, &[("b", content)]);
    let side2 = make_tree(&store, &[("a", b"edited in place\n")]);

    let opts = MergeOptions {
        detect_renames: RenameDetection::Off,
        buffer_output: 2,
        ..MergeOptions::default()
    };
    let result = merge_trees(&store, &base, &side1, &side2, &opts).unwrap();
    // Without rename detection this is a modify/delete at "a" plus an
    // unrelated add at "b".
    assert!(!result.clean);
    assert!(result
        .conflicts
        .iter()
        .any(|c| c.path == "a" && c.conflict_type == ConflictType::ModifyDelete));
}

#[test]
fn executable_bit_change_carries_over() {
    let store = MemoryStore::new();
    let content = blob(&store, b"#!/bin/sh\nexit 0\n");
    let base = make_tree_level(
        &store,
        &[(BString::from("run.sh"), content, FileMode::Regular)],
    );
    let side1 = make_tree_level(
        &store,
        &[(BString::from("run.sh"), content, FileMode::Executable)],
    );
    let edited = blob(&store, b"#!/bin/sh\nexit 1\n");
    let side2 = make_tree_level(
        &store,
        &[(BString::from("run.sh"), edited, FileMode::Regular)],
    );

    let result = merge(&store, &base, &side1, &side2);
    assert!(result.clean, "messages: {}", result.messages);
    let files = flatten(&store, &result.tree);
    assert_eq!(files["run.sh"].0, FileMode::Executable);
    assert_eq!(files["run.sh"].1, edited);
}

#[test]
fn file_vs_symlink_type_mismatch_prefers_the_file() {
    let store = MemoryStore::new();
    let base_blob = blob(&store, b"plain\n");
    let base = make_tree_level(
        &store,
        &[(BString::from("p"), base_blob, FileMode::Regular)],
    );
    let file_blob = blob(&store, b"still a file\n");
    let side1 = make_tree_level(
        &store,
        &[(BString::from("p"), file_blob, FileMode::Regular)],
    );
    let link_blob = blob(&store, b"target");
    let side2 = make_tree_level(
        &store,
        &[(BString::from("p"), link_blob, FileMode::Symlink)],
    );

    let result = merge(&store, &base, &side1, &side2);
    assert!(!result.clean);
    assert_eq!(result.conflicts[0].conflict_type, ConflictType::TypeChange);
    let files = flatten(&store, &result.tree);
    assert_eq!(files["p"].0, FileMode::Regular);
    assert_eq!(files["p"].1, file_blob);
}

#[test]
fn deep_nesting_rebuilds_only_changed_subtrees() {
    let store = MemoryStore::new();
    let base = make_tree(
        &store,
        &[
            ("a/deep/nested/file", b"one\n"),
            ("a/other/file", b"two\n"),
            ("top", b"three\n"),
        ],
    );
    let side1 = make_tree(
        &store,
        &[
            ("a/deep/nested/file", b"one changed\n"),
            ("a/other/file", b"two\n"),
            ("top", b"three\n"),
        ],
    );
    let side2 = make_tree(
        &store,
        &[
            ("a/deep/nested/file", b"one\n"),
            ("a/other/file", b"two\n"),
            ("top", b"three changed\n"),
        ],
    );

    let result = merge(&store, &base, &side1, &side2);
    assert!(result.clean);
    let files = flatten(&store, &result.tree);
    assert_eq!(
        blob_content(&store, &files["a/deep/nested/file"].1),
        b"one changed\n"
    );
    assert_eq!(blob_content(&store, &files["top"].1), b"three changed\n");
    assert_eq!(blob_content(&store, &files["a/other/file"].1), b"two\n");
}

#[test]
fn both_sides_delete_is_clean() {
    let store = MemoryStore::new();
    let base = make_tree(&store, &[("gone", b"bye\n"), ("kept", b"hi\n")]);
    let side = make_tree(&store, &[("kept", b"hi\n")]);

    let result = merge(&store, &base, &side, &side);
    assert!(result.clean);
    assert_eq!(result.tree, side);
}
