//! Engine assembly: the two top-level operations, the recursive driver for
//! multiple merge bases, and result finalization.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use bstr::{BStr, BString, ByteSlice};
use ort_hash::ObjectId;
use ort_object::{Commit, FileMode, Object, Tree, TreeEntry};
use ort_odb::ObjectStore;

use crate::entry::{ConflictInfo, Entry};
use crate::output::DiagnosticSink;
use crate::{
    ConflictEntry, ConflictSide, ConflictType, MergeError, MergeOptions, MergeResult,
    NoHistorySubmoduleMerger, SubmoduleMerger,
};

static NO_SUBMODULES: NoHistorySubmoduleMerger = NoHistorySubmoduleMerger;

/// Merge front end: binds the object store, the submodule merger, and a set
/// of options, and runs one engine per operation.
pub struct Merger<'a> {
    store: &'a dyn ObjectStore,
    submodules: &'a dyn SubmoduleMerger,
    options: MergeOptions,
}

impl<'a> Merger<'a> {
    pub fn new(store: &'a dyn ObjectStore, options: MergeOptions) -> Self {
        Self {
            store,
            submodules: &NO_SUBMODULES,
            options,
        }
    }

    /// Replace the default (history-less) submodule merger.
    pub fn with_submodule_merger(mut self, submodules: &'a dyn SubmoduleMerger) -> Self {
        self.submodules = submodules;
        self
    }

    /// Merge two trees against their common-ancestor tree.
    pub fn merge_trees(
        &self,
        merge_base: &ObjectId,
        side1: &ObjectId,
        side2: &ObjectId,
    ) -> Result<MergeResult, MergeError> {
        validate_options(&self.options)?;
        let mut engine = Engine::start(self.store, self.submodules, &self.options);
        engine.ancestor_label = self
            .options
            .ancestor
            .clone()
            .unwrap_or_else(|| "base".to_string());
        let (tree, clean) = engine.merge_trees_internal(*merge_base, *side1, *side2)?;
        Ok(engine.finalize(tree, clean))
    }

    /// Merge two commits, folding multiple merge bases into a virtual
    /// ancestor first.
    pub fn merge_commits(
        &self,
        commit1: &ObjectId,
        commit2: &ObjectId,
        merge_bases: &[ObjectId],
    ) -> Result<MergeResult, MergeError> {
        validate_options(&self.options)?;
        let mut engine = Engine::start(self.store, self.submodules, &self.options);
        let (tree, clean) = engine.merge_commits_internal(commit1, commit2, merge_bases)?;
        Ok(engine.finalize(tree, clean))
    }
}

/// Merge two trees against their common-ancestor tree.
///
/// Returns the merged tree id, the clean flag, and the unmerged entries.
pub fn merge_trees(
    store: &dyn ObjectStore,
    merge_base: &ObjectId,
    side1: &ObjectId,
    side2: &ObjectId,
    options: &MergeOptions,
) -> Result<MergeResult, MergeError> {
    Merger::new(store, options.clone()).merge_trees(merge_base, side1, side2)
}

/// Merge two commits using the caller-supplied merge bases.
///
/// With more than one base, the bases are merged pairwise into a virtual
/// ancestor before the final merge; with none, the empty tree stands in.
pub fn merge_commits(
    store: &dyn ObjectStore,
    commit1: &ObjectId,
    commit2: &ObjectId,
    merge_bases: &[ObjectId],
    options: &MergeOptions,
) -> Result<MergeResult, MergeError> {
    Merger::new(store, options.clone()).merge_commits(commit1, commit2, merge_bases)
}

fn validate_options(opts: &MergeOptions) -> Result<(), MergeError> {
    if opts.rename_score > 100 {
        return Err(MergeError::InvalidOptions("rename_score must be 0-100"));
    }
    if opts.verbosity > 5 {
        return Err(MergeError::InvalidOptions("verbosity must be 0-5"));
    }
    if opts.buffer_output > 2 {
        return Err(MergeError::InvalidOptions("buffer_output must be 0-2"));
    }
    Ok(())
}

/// One merge invocation's state. All maps live until [`Engine::finalize`];
/// the recursive driver clears them between base-merge iterations.
pub(crate) struct Engine<'a> {
    pub(crate) store: &'a dyn ObjectStore,
    pub(crate) submodules: &'a dyn SubmoduleMerger,
    pub(crate) opts: &'a MergeOptions,
    pub(crate) out: DiagnosticSink,
    /// The path table: full path from the root, no leading or trailing
    /// slash, to the per-path record.
    pub(crate) paths: HashMap<Rc<BString>, Entry>,
    /// Paths whose resolution ended unclean, in discovery order.
    pub(crate) unmerged: Vec<Rc<BString>>,
    /// Directories present in the base and on exactly one side; directory
    /// rename detection only runs when this is non-empty.
    pub(crate) dir_rename_sources: HashSet<BString>,
    /// The interned root directory name, shared by every top-level entry.
    pub(crate) root_dir: Rc<BString>,
    pub(crate) call_depth: usize,
    pub(crate) needed_rename_limit: usize,
    /// Side labels; temporarily overridden while folding merge bases.
    pub(crate) branch1: String,
    pub(crate) branch2: String,
    /// Base label for conflict markers at the current recursion level.
    pub(crate) ancestor_label: String,
}

impl<'a> Engine<'a> {
    pub(crate) fn start(
        store: &'a dyn ObjectStore,
        submodules: &'a dyn SubmoduleMerger,
        opts: &'a MergeOptions,
    ) -> Self {
        Self {
            store,
            submodules,
            opts,
            out: DiagnosticSink::new(opts.verbosity, opts.buffer_output),
            paths: HashMap::new(),
            unmerged: Vec::new(),
            dir_rename_sources: HashSet::new(),
            root_dir: Rc::new(BString::from("")),
            call_depth: 0,
            needed_rename_limit: 0,
            branch1: opts.branch1.clone(),
            branch2: opts.branch2.clone(),
            ancestor_label: String::new(),
        }
    }

    /// Clear per-merge state between recursive base-merge iterations.
    fn reset_maps(&mut self) {
        self.paths.clear();
        self.unmerged.clear();
        self.dir_rename_sources.clear();
    }

    /// The non-recursive merge: one base tree, two side trees.
    pub(crate) fn merge_trees_internal(
        &mut self,
        merge_base: ObjectId,
        side1: ObjectId,
        side2: ObjectId,
    ) -> Result<(ObjectId, bool), MergeError> {
        let mut merge_base = merge_base;
        let mut side2 = side2;
        if let Some(shift) = self.opts.subtree_shift.clone().filter(|s| !s.is_empty()) {
            side2 = self.splice_tree(&side1, &side2, shift.as_bstr())?;
            merge_base = self.splice_tree(&side1, &merge_base, shift.as_bstr())?;
        }

        // Tree-equality fast paths: nothing to merge.
        if side1 == side2 {
            return Ok((side1, true));
        }
        if merge_base == side1 {
            return Ok((side2, true));
        }
        if merge_base == side2 {
            let depth = self.call_depth;
            self.out.note(depth, 0, "Already up to date.");
            return Ok((side1, true));
        }

        self.collect_merge_info(&merge_base, &side1, &side2)?;
        let renames_clean = self.detect_and_process_renames(&merge_base, &side1, &side2)?;
        let tree = self.process_entries()?;
        let clean = renames_clean && self.unmerged.is_empty();
        Ok((tree, clean))
    }

    /// The recursive driver: read the two commits, fold their merge bases
    /// pairwise into a virtual ancestor, then merge the two trees.
    fn merge_commits_internal(
        &mut self,
        commit1: &ObjectId,
        commit2: &ObjectId,
        merge_bases: &[ObjectId],
    ) -> Result<(ObjectId, bool), MergeError> {
        let tree1 = read_commit(self.store, commit1)?.tree;
        let tree2 = read_commit(self.store, commit2)?.tree;

        let (ancestor_tree, derived_label) = match merge_bases {
            [] => {
                // Unrelated histories: merge against nothing.
                let empty = self.store.write(&Object::Tree(Tree::new()))?;
                (empty, "empty tree".to_string())
            }
            [only] => (read_commit(self.store, only)?.tree, only.abbrev(7)),
            [first, rest @ ..] => {
                let mut virtual_tree = read_commit(self.store, first)?.tree;
                for base in rest {
                    let next_tree = read_commit(self.store, base)?.tree;
                    virtual_tree = self.merge_base_pair(virtual_tree, next_tree)?;
                }
                (virtual_tree, "merged common ancestors".to_string())
            }
        };

        self.ancestor_label = match (&self.opts.ancestor, self.call_depth) {
            (Some(label), 0) => label.clone(),
            _ => derived_label,
        };
        self.merge_trees_internal(ancestor_tree, tree1, tree2)
    }

    /// Merge two (possibly virtual) base trees into the next virtual base.
    ///
    /// Runs one level deeper under the temporary branch labels. The merge
    /// bases of two bases would need a history walk, which the engine does
    /// not do; the empty tree stands in as their ancestor, the same
    /// degradation used for unrelated histories. Conflict markers committed
    /// into the virtual tree are fine: the outer merge treats them as
    /// content.
    fn merge_base_pair(
        &mut self,
        prev: ObjectId,
        next: ObjectId,
    ) -> Result<ObjectId, MergeError> {
        let saved_branch1 = std::mem::replace(&mut self.branch1, "Temporary merge branch 1".into());
        let saved_branch2 = std::mem::replace(&mut self.branch2, "Temporary merge branch 2".into());
        let saved_ancestor = std::mem::replace(&mut self.ancestor_label, "empty tree".into());
        self.call_depth += 1;

        let empty = self.store.write(&Object::Tree(Tree::new()))?;
        let result = self.merge_trees_internal(empty, prev, next);

        self.call_depth -= 1;
        self.branch1 = saved_branch1;
        self.branch2 = saved_branch2;
        self.ancestor_label = saved_ancestor;
        self.reset_maps();

        result.map(|(tree, _clean)| tree)
    }

    /// Graft `two` into `one`'s structure at `prefix`, writing the spliced
    /// trees to the store (subtree merge).
    fn splice_tree(
        &self,
        one: &ObjectId,
        two: &ObjectId,
        prefix: &BStr,
    ) -> Result<ObjectId, MergeError> {
        let components: Vec<&BStr> = prefix.split_str("/").map(BStr::new).collect();
        self.splice_level(Some(*one), &components, two)
    }

    fn splice_level(
        &self,
        skeleton: Option<ObjectId>,
        components: &[&BStr],
        graft: &ObjectId,
    ) -> Result<ObjectId, MergeError> {
        let Some((component, rest)) = components.split_first() else {
            return Ok(*graft);
        };

        let mut tree = match skeleton {
            Some(oid) => read_tree(self.store, &oid)?,
            None => Tree::new(),
        };
        let child_skeleton = tree
            .find(component)
            .filter(|e| e.mode.is_tree())
            .map(|e| e.oid);
        let child = self.splice_level(child_skeleton, rest, graft)?;

        match tree
            .entries
            .iter_mut()
            .find(|e| e.name.as_bstr() == *component)
        {
            Some(entry) => {
                entry.mode = FileMode::Tree;
                entry.oid = child;
            }
            None => tree.entries.push(TreeEntry {
                mode: FileMode::Tree,
                name: BString::from(component.as_bytes()),
                oid: child,
            }),
        }
        Ok(self.store.write(&Object::Tree(tree))?)
    }

    /// Produce the caller-facing result and flush diagnostics.
    fn finalize(&mut self, tree: ObjectId, clean: bool) -> MergeResult {
        if self.needed_rename_limit > 0 {
            let needed = self.needed_rename_limit;
            self.out.note(
                0,
                2,
                &format!(
                    "warning: skipped inexact rename detection: {} candidates exceed the rename limit",
                    needed
                ),
            );
        }

        let mut unmerged = std::mem::take(&mut self.unmerged);
        unmerged.sort();
        let conflicts = unmerged
            .iter()
            .filter_map(|path| {
                self.paths
                    .get(path)
                    .and_then(Entry::conflict)
                    .map(|ci| conflict_entry(path, ci))
            })
            .collect();

        self.out.flush();
        MergeResult {
            tree,
            clean,
            conflicts,
            messages: self.out.take(),
        }
    }
}

/// Snapshot one unmerged path for the caller.
fn conflict_entry(path: &Rc<BString>, ci: &ConflictInfo) -> ConflictEntry {
    let side = |i: usize| {
        if ci.filemask & (1 << i) == 0 {
            return None;
        }
        ci.stages[i].map(|version| ConflictSide {
            oid: version.oid,
            mode: version.mode,
            path: ci.pathnames[i].as_ref().clone(),
        })
    };
    ConflictEntry {
        path: path.as_ref().clone(),
        conflict_type: classify(ci),
        base: side(0),
        ours: side(1),
        theirs: side(2),
    }
}

fn classify(ci: &ConflictInfo) -> ConflictType {
    if let Some(kind) = ci.kind {
        return kind;
    }
    if ci.df_conflict {
        return ConflictType::DirectoryFile;
    }
    if ci.path_conflict {
        return ConflictType::RenameRename;
    }
    match ci.filemask {
        3 | 5 => ConflictType::ModifyDelete,
        6 | 7 if ci.stages[0].is_none() => ConflictType::AddAdd,
        _ => ConflictType::Content,
    }
}

pub(crate) fn read_tree(store: &dyn ObjectStore, oid: &ObjectId) -> Result<Tree, MergeError> {
    match store.read(oid)? {
        Some(Object::Tree(tree)) => Ok(tree),
        Some(other) => Err(MergeError::UnexpectedObjectType {
            oid: *oid,
            expected: "tree",
            actual: other.object_type().to_string(),
        }),
        None => Err(MergeError::ObjectNotFound(*oid)),
    }
}

pub(crate) fn read_commit(store: &dyn ObjectStore, oid: &ObjectId) -> Result<Commit, MergeError> {
    match store.read(oid)? {
        Some(Object::Commit(commit)) => Ok(commit),
        Some(other) => Err(MergeError::UnexpectedObjectType {
            oid: *oid,
            expected: "commit",
            actual: other.object_type().to_string(),
        }),
        None => Err(MergeError::ObjectNotFound(*oid)),
    }
}
