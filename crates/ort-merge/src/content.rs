//! Three-way content merge of a single path.
//!
//! Resolves modes first, then dispatches on object type: regular files go
//! through the line-level merger (and the merged blob is written to the
//! store), symlinks prefer side 1 unless the sides agree, submodule
//! pointers go to the submodule-merger collaborator. A type disagreement
//! cannot be merged at all; the submodule wins over a regular file, and a
//! regular file over a symlink.

use bstr::{BString, ByteSlice};
use ort_diff::algorithm::{diff_edits, split_lines, Edit, EditOp};
use ort_diff::DiffAlgorithm;
use ort_hash::ObjectId;
use ort_object::{Blob, Object};
use ort_odb::ObjectStore;
use std::rc::Rc;

use crate::engine::Engine;
use crate::entry::VersionInfo;
use crate::{ConflictStyle, ConflictType, MergeError, MergeVariant, SubmoduleResolution};

/// What a content merge produced.
pub(crate) struct ContentMergeOutcome {
    pub version: VersionInfo,
    pub clean: bool,
    /// Classification hint when unclean.
    pub kind: Option<ConflictType>,
}

impl Engine<'_> {
    /// Merge `{base, side1, side2}` versions of one path.
    ///
    /// `path` is the target location (used in diagnostics and for the
    /// submodule merger); `pathnames` are the per-side locations, which
    /// differ from `path` after renames and feed the conflict-marker
    /// labels. `extra_marker_size` widens the markers for nested merges so
    /// an outer merge can tell its own markers from committed inner ones.
    pub(crate) fn handle_content_merge(
        &mut self,
        path: &BString,
        base: Option<VersionInfo>,
        side1: Option<VersionInfo>,
        side2: Option<VersionInfo>,
        pathnames: &[Rc<BString>; 3],
        extra_marker_size: usize,
    ) -> Result<ContentMergeOutcome, MergeError> {
        let a = side1.ok_or(MergeError::Internal("content merge without a side 1 version"))?;
        let b = side2.ok_or(MergeError::Internal("content merge without a side 2 version"))?;

        if !a.mode.is_compatible_with(b.mode) {
            // Not both files, not both symlinks, not both submodules. The
            // paths cannot coexist, so pick one: submodule over regular
            // file, regular file over symlink.
            let version = if a.mode.is_gitlink() {
                a
            } else if b.mode.is_gitlink() {
                b
            } else if a.mode.is_blob() {
                a
            } else if b.mode.is_blob() {
                b
            } else {
                a
            };
            return Ok(ContentMergeOutcome {
                version,
                clean: false,
                kind: Some(ConflictType::TypeChange),
            });
        }

        // Merge modes. Beyond the trivial cases only the executable bit
        // can differ, and a one-sided flip wins.
        let base_mode = base.map(|v| v.mode);
        let mut clean = true;
        let mode = if a.mode == b.mode || Some(a.mode) == base_mode {
            b.mode
        } else {
            debug_assert!(a.mode.is_blob());
            clean = Some(b.mode) == base_mode;
            a.mode
        };

        let base_oid = base.map(|v| v.oid);
        let mut kind = None;
        let oid;

        if a.mode.is_blob() {
            // The general text-merge path runs even for trivially equal
            // inputs; the content-addressed store collapses those to the
            // same blob anyway.
            let base_bytes = match base {
                Some(v) if v.mode.is_blob() || v.mode.is_symlink() => {
                    read_blob(self.store, &v.oid)?
                }
                _ => Vec::new(),
            };
            let a_bytes = read_blob(self.store, &a.oid)?;
            let b_bytes = read_blob(self.store, &b.oid)?;

            let (base_bytes, a_bytes, b_bytes) = if self.opts.renormalize {
                (
                    normalize_crlf(&base_bytes),
                    normalize_crlf(&a_bytes),
                    normalize_crlf(&b_bytes),
                )
            } else {
                (base_bytes, a_bytes, b_bytes)
            };

            let labels = self.marker_labels(pathnames);
            let variant = if self.call_depth > 0 {
                MergeVariant::Normal
            } else {
                self.opts.recursive_variant
            };
            let (bytes, text_clean) = merge_blobs(
                &base_bytes,
                &a_bytes,
                &b_bytes,
                &labels,
                self.opts.conflict_style,
                self.opts.diff_algorithm,
                7 + extra_marker_size,
                variant,
            );
            oid = self.store.write(&Object::Blob(Blob::new(bytes)))?;
            if !text_clean {
                clean = false;
                kind = Some(if base.is_none() {
                    ConflictType::AddAdd
                } else {
                    ConflictType::Content
                });
            }
        } else if a.mode.is_gitlink() {
            if a.oid == b.oid {
                oid = b.oid;
            } else if base_oid == Some(a.oid) {
                oid = b.oid;
            } else if base_oid == Some(b.oid) {
                oid = a.oid;
            } else if let Some(base_oid) = base_oid {
                match self
                    .submodules
                    .merge(path.as_bstr(), base_oid, a.oid, b.oid, self.call_depth == 0)
                {
                    SubmoduleResolution::Resolved(resolved) => oid = resolved,
                    SubmoduleResolution::Unresolved { suggestion } => {
                        clean = false;
                        kind = Some(ConflictType::Submodule);
                        oid = a.oid;
                        let depth = self.call_depth;
                        self.out
                            .note(depth, 1, &format!("Failed to merge submodule {}", path));
                        if let Some(candidate) = suggestion {
                            self.out.note(
                                depth,
                                2,
                                &format!(
                                    "Found a possible merge resolution for submodule {}: {}; add it to the index to accept it.",
                                    path,
                                    candidate.to_hex()
                                ),
                            );
                        }
                    }
                }
            } else {
                // Both sides added different submodule pointers; deletion
                // or addition conflicts are not the merger's to resolve.
                clean = false;
                kind = Some(ConflictType::Submodule);
                oid = a.oid;
            }
        } else if a.mode.is_symlink() {
            if a.oid == b.oid || base_oid == Some(a.oid) {
                oid = b.oid;
            } else if base_oid == Some(b.oid) {
                oid = a.oid;
            } else {
                let variant = if self.call_depth > 0 {
                    MergeVariant::Normal
                } else {
                    self.opts.recursive_variant
                };
                oid = match variant {
                    MergeVariant::Normal => {
                        clean = false;
                        kind = Some(ConflictType::Content);
                        a.oid
                    }
                    MergeVariant::Ours => a.oid,
                    MergeVariant::Theirs => b.oid,
                };
            }
        } else {
            return Err(MergeError::Internal("unsupported object type in tree"));
        }

        Ok(ContentMergeOutcome {
            version: VersionInfo { mode, oid },
            clean,
            kind,
        })
    }

    /// Conflict-marker labels: the configured names, extended with the
    /// per-side path whenever renames made the three paths disagree.
    fn marker_labels(&self, pathnames: &[Rc<BString>; 3]) -> MergeLabels {
        let same = pathnames[0] == pathnames[1] && pathnames[1] == pathnames[2];
        if same {
            MergeLabels {
                base: self.ancestor_label.clone(),
                ours: self.branch1.clone(),
                theirs: self.branch2.clone(),
            }
        } else {
            MergeLabels {
                base: format!("{}:{}", self.ancestor_label, pathnames[0]),
                ours: format!("{}:{}", self.branch1, pathnames[1]),
                theirs: format!("{}:{}", self.branch2, pathnames[2]),
            }
        }
    }
}

/// Read blob bytes; the null id reads as empty.
pub(crate) fn read_blob(store: &dyn ObjectStore, oid: &ObjectId) -> Result<Vec<u8>, MergeError> {
    if oid.is_null() {
        return Ok(Vec::new());
    }
    match store.read(oid)? {
        Some(Object::Blob(blob)) => Ok(blob.data),
        Some(other) => Err(MergeError::UnexpectedObjectType {
            oid: *oid,
            expected: "blob",
            actual: other.object_type().to_string(),
        }),
        None => Err(MergeError::ObjectNotFound(*oid)),
    }
}

/// Conflict-marker labels.
pub(crate) struct MergeLabels {
    pub base: String,
    pub ours: String,
    pub theirs: String,
}

/// Line-level three-way merge.
///
/// Diffs base→ours and base→theirs, interleaves non-overlapping regions,
/// and emits conflict markers (or the favored side) where they overlap.
/// Returns the merged bytes and whether the merge was conflict-free.
#[allow(clippy::too_many_arguments)]
pub(crate) fn merge_blobs(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    labels: &MergeLabels,
    style: ConflictStyle,
    algorithm: DiffAlgorithm,
    marker_size: usize,
    variant: MergeVariant,
) -> (Vec<u8>, bool) {
    if ours == theirs {
        return (ours.to_vec(), true);
    }
    if base == ours {
        return (theirs.to_vec(), true);
    }
    if base == theirs {
        return (ours.to_vec(), true);
    }

    let base_lines = split_lines(base);
    let ours_lines = split_lines(ours);
    let theirs_lines = split_lines(theirs);

    let regions_ours = change_regions(&diff_edits(base, ours, algorithm));
    let regions_theirs = change_regions(&diff_edits(base, theirs, algorithm));

    merge_regions(
        &base_lines,
        &ours_lines,
        &theirs_lines,
        &regions_ours,
        &regions_theirs,
        labels,
        style,
        marker_size,
        variant,
    )
}

/// A contiguous run of changes relative to the base.
#[derive(Debug, Clone)]
struct ChangeRegion {
    /// First changed base line.
    base_start: usize,
    /// Lines removed from the base.
    base_len: usize,
    /// First line in the changed file.
    new_start: usize,
    /// Lines added by the changed file.
    new_len: usize,
}

fn change_regions(edits: &[Edit]) -> Vec<ChangeRegion> {
    let mut regions = Vec::new();
    let mut i = 0;

    while i < edits.len() {
        if edits[i].op == EditOp::Equal {
            i += 1;
            continue;
        }
        let base_start = edits[i].old_index;
        let new_start = edits[i].new_index;
        let mut base_end = base_start;
        let mut new_end = new_start;

        while i < edits.len() && edits[i].op != EditOp::Equal {
            match edits[i].op {
                EditOp::Delete => base_end = edits[i].old_index + 1,
                EditOp::Insert => new_end = edits[i].new_index + 1,
                EditOp::Equal => unreachable!(),
            }
            i += 1;
        }

        regions.push(ChangeRegion {
            base_start,
            base_len: base_end - base_start,
            new_start,
            new_len: new_end - new_start,
        });
    }

    regions
}

#[allow(clippy::too_many_arguments)]
fn merge_regions(
    base_lines: &[&[u8]],
    ours_lines: &[&[u8]],
    theirs_lines: &[&[u8]],
    regions_ours: &[ChangeRegion],
    regions_theirs: &[ChangeRegion],
    labels: &MergeLabels,
    style: ConflictStyle,
    marker_size: usize,
    variant: MergeVariant,
) -> (Vec<u8>, bool) {
    let mut output: Vec<u8> = Vec::new();
    let mut clean = true;

    let mut base_pos = 0;
    let mut oi = 0;
    let mut ti = 0;
    // Cumulative (new_len - base_len) of consumed regions per side. Off a
    // region boundary, base line p corresponds to side line p + delta.
    let mut ours_delta: isize = 0;
    let mut theirs_delta: isize = 0;

    while oi < regions_ours.len() || ti < regions_theirs.len() {
        match (regions_ours.get(oi), regions_theirs.get(ti)) {
            (Some(o), Some(t)) => {
                let o_end = o.base_start + o.base_len;
                let t_end = t.base_start + t.base_len;

                if o_end < t.base_start || (o_end == t.base_start && o.base_start < t.base_start) {
                    // Ours strictly first; no overlap.
                    emit_lines(&mut output, base_lines, base_pos, o.base_start - base_pos);
                    emit_lines(&mut output, ours_lines, o.new_start, o.new_len);
                    base_pos = o_end;
                    ours_delta += o.new_len as isize - o.base_len as isize;
                    oi += 1;
                } else if t_end < o.base_start
                    || (t_end == o.base_start && t.base_start < o.base_start)
                {
                    // Theirs strictly first; no overlap.
                    emit_lines(&mut output, base_lines, base_pos, t.base_start - base_pos);
                    emit_lines(&mut output, theirs_lines, t.new_start, t.new_len);
                    base_pos = t_end;
                    theirs_delta += t.new_len as isize - t.base_len as isize;
                    ti += 1;
                } else {
                    // Overlap. Coalesce the whole chain of regions touching
                    // this base range: a region on either side that starts
                    // inside the range extends it.
                    let overlap_start = o.base_start.min(t.base_start);
                    let mut overlap_end = o_end.max(t_end);
                    let ours_from = (overlap_start as isize + ours_delta) as usize;
                    let theirs_from = (overlap_start as isize + theirs_delta) as usize;

                    ours_delta += o.new_len as isize - o.base_len as isize;
                    theirs_delta += t.new_len as isize - t.base_len as isize;
                    oi += 1;
                    ti += 1;
                    loop {
                        let mut extended = false;
                        if let Some(next) = regions_ours.get(oi) {
                            if next.base_start < overlap_end {
                                overlap_end = overlap_end.max(next.base_start + next.base_len);
                                ours_delta += next.new_len as isize - next.base_len as isize;
                                oi += 1;
                                extended = true;
                            }
                        }
                        if let Some(next) = regions_theirs.get(ti) {
                            if next.base_start < overlap_end {
                                overlap_end = overlap_end.max(next.base_start + next.base_len);
                                theirs_delta += next.new_len as isize - next.base_len as isize;
                                ti += 1;
                                extended = true;
                            }
                        }
                        if !extended {
                            break;
                        }
                    }

                    let ours_to = (overlap_end as isize + ours_delta) as usize;
                    let theirs_to = (overlap_end as isize + theirs_delta) as usize;
                    let ours_content = collect_lines(ours_lines, ours_from, ours_to - ours_from);
                    let theirs_content =
                        collect_lines(theirs_lines, theirs_from, theirs_to - theirs_from);

                    emit_lines(&mut output, base_lines, base_pos, overlap_start - base_pos);

                    if ours_content == theirs_content {
                        // Both sides made the same change.
                        output.extend_from_slice(&ours_content);
                    } else {
                        match variant {
                            MergeVariant::Ours => output.extend_from_slice(&ours_content),
                            MergeVariant::Theirs => output.extend_from_slice(&theirs_content),
                            MergeVariant::Normal => {
                                clean = false;
                                let base_content = collect_lines(
                                    base_lines,
                                    overlap_start,
                                    overlap_end - overlap_start,
                                );
                                emit_conflict(
                                    &mut output,
                                    &ours_content,
                                    &theirs_content,
                                    &base_content,
                                    labels,
                                    style,
                                    marker_size,
                                );
                            }
                        }
                    }

                    base_pos = overlap_end;
                }
            }
            (Some(o), None) => {
                emit_lines(&mut output, base_lines, base_pos, o.base_start - base_pos);
                emit_lines(&mut output, ours_lines, o.new_start, o.new_len);
                base_pos = o.base_start + o.base_len;
                ours_delta += o.new_len as isize - o.base_len as isize;
                oi += 1;
            }
            (None, Some(t)) => {
                emit_lines(&mut output, base_lines, base_pos, t.base_start - base_pos);
                emit_lines(&mut output, theirs_lines, t.new_start, t.new_len);
                base_pos = t.base_start + t.base_len;
                theirs_delta += t.new_len as isize - t.base_len as isize;
                ti += 1;
            }
            (None, None) => unreachable!(),
        }
    }

    emit_lines(
        &mut output,
        base_lines,
        base_pos,
        base_lines.len().saturating_sub(base_pos),
    );

    (output, clean)
}

/// Append `count` lines starting at `start` (lines keep their endings).
fn emit_lines(output: &mut Vec<u8>, lines: &[&[u8]], start: usize, count: usize) {
    for line in lines.iter().skip(start).take(count) {
        output.extend_from_slice(line);
    }
}

fn collect_lines(lines: &[&[u8]], start: usize, count: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    emit_lines(&mut buf, lines, start, count);
    buf
}

fn emit_conflict(
    output: &mut Vec<u8>,
    ours_content: &[u8],
    theirs_content: &[u8],
    base_content: &[u8],
    labels: &MergeLabels,
    style: ConflictStyle,
    marker_size: usize,
) {
    push_marker(output, b'<', marker_size, Some(&labels.ours));
    output.extend_from_slice(ours_content);
    if style == ConflictStyle::Diff3 {
        push_marker(output, b'|', marker_size, Some(&labels.base));
        output.extend_from_slice(base_content);
    }
    push_marker(output, b'=', marker_size, None);
    output.extend_from_slice(theirs_content);
    push_marker(output, b'>', marker_size, Some(&labels.theirs));
}

fn push_marker(output: &mut Vec<u8>, marker: u8, marker_size: usize, label: Option<&str>) {
    output.extend(std::iter::repeat(marker).take(marker_size));
    if let Some(label) = label {
        output.push(b' ');
        output.extend_from_slice(label.as_bytes());
    }
    output.push(b'\n');
}

/// Strip carriage returns from CRLF pairs.
fn normalize_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\r' && data.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        out.push(data[i]);
        i += 1;
    }
    out
}
