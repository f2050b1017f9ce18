//! The collector: a synchronized preorder walk of the three trees.
//!
//! Each visited path gets exactly one path-table entry. Cheap resolutions
//! happen inline (identical on all sides, sides agree, one side left the
//! base alone); everything else becomes a provisional conflict record for
//! the later stages. The walk also notes which directories are candidate
//! directory-rename sources: present in the base and on exactly one side.

use std::collections::BTreeMap;
use std::rc::Rc;

use bstr::BString;
use ort_object::Tree;
use ort_hash::ObjectId;

use crate::engine::{read_tree, Engine};
use crate::entry::{ConflictInfo, Entry, MergedInfo, VersionInfo};
use crate::MergeError;

impl Engine<'_> {
    pub(crate) fn collect_merge_info(
        &mut self,
        merge_base: &ObjectId,
        side1: &ObjectId,
        side2: &ObjectId,
    ) -> Result<(), MergeError> {
        let trees = [
            Some(read_tree(self.store, merge_base)?),
            Some(read_tree(self.store, side1)?),
            Some(read_tree(self.store, side2)?),
        ];
        let root = self.root_dir.clone();
        self.collect_level(trees, root, false)
    }

    /// Visit one directory level. `trees[i]` is side *i*'s tree at this
    /// level, absent where that side has no directory here.
    fn collect_level(
        &mut self,
        trees: [Option<Tree>; 3],
        current_dir: Rc<BString>,
        inside_possibly_renamed_dir: bool,
    ) -> Result<(), MergeError> {
        // Union of entry names at this level, each with its three versions.
        let mut names: BTreeMap<BString, [Option<VersionInfo>; 3]> = BTreeMap::new();
        for (i, tree) in trees.iter().enumerate() {
            let Some(tree) = tree else { continue };
            for entry in &tree.entries {
                names.entry(entry.name.clone()).or_insert([None; 3])[i] = Some(VersionInfo {
                    mode: entry.mode,
                    oid: entry.oid,
                });
            }
        }

        let basename_offset = if current_dir.is_empty() {
            0
        } else {
            current_dir.len() + 1
        };

        for (name, versions) in names {
            let mut dirmask = 0u8;
            let mut mask = 0u8;
            for (i, version) in versions.iter().enumerate() {
                if let Some(v) = version {
                    mask |= 1 << i;
                    if v.mode.is_tree() {
                        dirmask |= 1 << i;
                    }
                }
            }
            let mut filemask = mask & !dirmask;
            // A directory/file collision flags the file, never the
            // directory; parent-level D/F conflicts do not propagate down.
            let df_conflict = filemask != 0 && dirmask != 0;

            let mut side1_matches_mbase = versions[0].is_some() && versions[0] == versions[1];
            let mut side2_matches_mbase = versions[0].is_some() && versions[0] == versions[2];
            let sides_match = versions[1].is_some() && versions[1] == versions[2];

            let mut full = BString::from(current_dir.as_slice());
            if !full.is_empty() {
                full.push(b'/');
            }
            full.extend_from_slice(&name);
            let path_rc = Rc::new(full);

            // All three identical: resolve to the base, even for trees.
            // Nothing can be renamed into or out of an untouched subtree.
            if side1_matches_mbase && side2_matches_mbase {
                self.paths.insert(
                    path_rc,
                    Entry::Resolved(MergedInfo::resolved(
                        versions[0],
                        current_dir.clone(),
                        basename_offset,
                    )),
                );
                continue;
            }

            // Three files and the sides agree: take either side.
            if filemask == 7 && sides_match {
                self.paths.insert(
                    path_rc,
                    Entry::Resolved(MergedInfo::resolved(
                        versions[1],
                        current_dir.clone(),
                        basename_offset,
                    )),
                );
                continue;
            }

            // Side 1 left the base alone: side 2 carries all the interest.
            // Not applicable under a possibly-renamed directory, where the
            // untouched side's files may still need to move.
            if !inside_possibly_renamed_dir && side1_matches_mbase {
                if versions[2].is_none() {
                    // Deleted on side 2 with nothing to carry: drop the path.
                    continue;
                }
                if dirmask & 0b110 != 0 {
                    // A directory is involved; keep only side 2 so new files
                    // under a rename-target directory stay visible.
                    filemask &= 0b100;
                    dirmask &= 0b100;
                    side1_matches_mbase = false;
                } else {
                    self.paths.insert(
                        path_rc,
                        Entry::Resolved(MergedInfo::resolved(
                            versions[2],
                            current_dir.clone(),
                            basename_offset,
                        )),
                    );
                    continue;
                }
            }

            // Mirror image: side 2 left the base alone.
            if !inside_possibly_renamed_dir && side2_matches_mbase {
                if versions[1].is_none() {
                    continue;
                }
                if dirmask & 0b110 != 0 {
                    filemask &= 0b010;
                    dirmask &= 0b010;
                    side2_matches_mbase = false;
                } else {
                    self.paths.insert(
                        path_rc,
                        Entry::Resolved(MergedInfo::resolved(
                            versions[1],
                            current_dir.clone(),
                            basename_offset,
                        )),
                    );
                    continue;
                }
            }

            // Provisional conflict. Rename detection may still resolve it.
            let mut ci = ConflictInfo::new(path_rc.clone(), current_dir.clone(), basename_offset);
            for i in 0..3 {
                if filemask & (1 << i) != 0 {
                    ci.stages[i] = versions[i];
                }
            }
            ci.filemask = filemask;
            ci.dirmask = dirmask;
            ci.df_conflict = df_conflict;
            if filemask != 0 {
                ci.match_mask = if side1_matches_mbase {
                    3
                } else if side2_matches_mbase {
                    5
                } else if sides_match {
                    6
                } else {
                    0
                };
            }
            self.paths
                .insert(path_rc.clone(), Entry::Conflicted(Box::new(ci)));

            // A directory in the base and on exactly one side may have been
            // renamed by the other side. (The root always exists on every
            // side, so it can never qualify.)
            let mut child_iprd = inside_possibly_renamed_dir;
            if dirmask == 3 || dirmask == 5 {
                self.dir_rename_sources.insert(path_rc.as_ref().clone());
                child_iprd = true;
            }

            if dirmask != 0 {
                let mut children: [Option<Tree>; 3] = [None, None, None];
                for (i, child) in children.iter_mut().enumerate() {
                    if dirmask & (1 << i) != 0 {
                        let oid = match versions[i] {
                            Some(v) => v.oid,
                            None => {
                                return Err(MergeError::Internal(
                                    "dirmask bit set without a version",
                                ))
                            }
                        };
                        *child = Some(read_tree(self.store, &oid)?);
                    }
                }
                self.collect_level(children, path_rc, child_iprd)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MergeOptions;
    use bstr::ByteSlice;
    use ort_object::{Blob, FileMode, Object, TreeEntry};
    use ort_odb::{MemoryStore, ObjectStore};

    fn blob(store: &MemoryStore, data: &[u8]) -> ObjectId {
        store.write(&Object::Blob(Blob::new(data.to_vec()))).unwrap()
    }

    fn tree(store: &MemoryStore, entries: Vec<TreeEntry>) -> ObjectId {
        store.write(&Object::Tree(Tree { entries })).unwrap()
    }

    fn file_entry(name: &str, oid: ObjectId) -> TreeEntry {
        TreeEntry {
            mode: FileMode::Regular,
            name: BString::from(name),
            oid,
        }
    }

    fn dir_entry(name: &str, oid: ObjectId) -> TreeEntry {
        TreeEntry {
            mode: FileMode::Tree,
            name: BString::from(name),
            oid,
        }
    }

    #[test]
    fn identical_directory_resolves_without_recursion() {
        let store = MemoryStore::new();
        let inner = tree(&store, vec![file_entry("f", blob(&store, b"x\n"))]);
        let root = tree(&store, vec![dir_entry("sub", inner)]);

        let opts = MergeOptions::default();
        let subs = crate::NoHistorySubmoduleMerger;
        let mut engine = Engine::start(&store, &subs, &opts);
        engine.collect_merge_info(&root, &root, &root).unwrap();

        // One entry for "sub", resolved, and nothing for "sub/f".
        assert_eq!(engine.paths.len(), 1);
        let entry = engine.paths.get(&BString::from("sub")).unwrap();
        assert!(entry.is_clean());
        assert!(!entry.merged().is_null());
    }

    #[test]
    fn content_conflict_records_masks() {
        let store = MemoryStore::new();
        let base = tree(&store, vec![file_entry("a", blob(&store, b"1\n"))]);
        let side1 = tree(&store, vec![file_entry("a", blob(&store, b"2\n"))]);
        let side2 = tree(&store, vec![file_entry("a", blob(&store, b"3\n"))]);

        let opts = MergeOptions::default();
        let subs = crate::NoHistorySubmoduleMerger;
        let mut engine = Engine::start(&store, &subs, &opts);
        engine.collect_merge_info(&base, &side1, &side2).unwrap();

        let ci = engine
            .paths
            .get(&BString::from("a"))
            .and_then(Entry::conflict)
            .expect("conflict entry");
        assert_eq!(ci.filemask, 7);
        assert_eq!(ci.dirmask, 0);
        assert_eq!(ci.match_mask, 0);
        assert!(!ci.df_conflict);
    }

    #[test]
    fn one_sided_change_resolves_to_the_changed_side() {
        let store = MemoryStore::new();
        let new_blob = blob(&store, b"new\n");
        let base = tree(&store, vec![file_entry("a", blob(&store, b"old\n"))]);
        let side2 = tree(&store, vec![file_entry("a", new_blob)]);

        let opts = MergeOptions::default();
        let subs = crate::NoHistorySubmoduleMerger;
        let mut engine = Engine::start(&store, &subs, &opts);
        engine.collect_merge_info(&base, &base, &side2).unwrap();

        let entry = engine.paths.get(&BString::from("a")).unwrap();
        assert!(entry.is_clean());
        assert_eq!(entry.merged().result.unwrap().oid, new_blob);
    }

    #[test]
    fn file_vs_directory_sets_df_on_the_file() {
        let store = MemoryStore::new();
        let base = tree(&store, vec![]);
        let side1 = tree(&store, vec![file_entry("p", blob(&store, b"f\n"))]);
        let inner = tree(&store, vec![file_entry("q", blob(&store, b"g\n"))]);
        let side2 = tree(&store, vec![dir_entry("p", inner)]);

        let opts = MergeOptions::default();
        let subs = crate::NoHistorySubmoduleMerger;
        let mut engine = Engine::start(&store, &subs, &opts);
        engine.collect_merge_info(&base, &side1, &side2).unwrap();

        let ci = engine
            .paths
            .get(&BString::from("p"))
            .and_then(Entry::conflict)
            .expect("conflict entry");
        assert!(ci.df_conflict);
        assert_eq!(ci.filemask, 0b010);
        assert_eq!(ci.dirmask, 0b100);
        // The file under the directory was collected too.
        assert!(engine.paths.contains_key(&BString::from("p/q")));
    }

    #[test]
    fn base_plus_one_side_directory_is_a_rename_source() {
        let store = MemoryStore::new();
        let inner_base = tree(&store, vec![file_entry("f", blob(&store, b"1\n"))]);
        let inner_side1 = tree(&store, vec![file_entry("f", blob(&store, b"2\n"))]);
        let base = tree(&store, vec![dir_entry("old", inner_base)]);
        let side1 = tree(&store, vec![dir_entry("old", inner_side1)]);
        let side2_inner = tree(&store, vec![file_entry("f", blob(&store, b"1\n"))]);
        let side2 = tree(&store, vec![dir_entry("new", side2_inner)]);

        let opts = MergeOptions::default();
        let subs = crate::NoHistorySubmoduleMerger;
        let mut engine = Engine::start(&store, &subs, &opts);
        engine.collect_merge_info(&base, &side1, &side2).unwrap();

        assert!(engine.dir_rename_sources.contains(b"old".as_bstr()));
        assert!(!engine.dir_rename_sources.contains(b"new".as_bstr()));
    }
}
