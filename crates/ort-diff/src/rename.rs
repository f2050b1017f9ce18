//! Rename detection over a diff result.
//!
//! Two passes, as in the parent project: an exact pass pairing deletes and
//! adds with identical ids, then a similarity pass scoring remaining
//! candidates with a line-level delta metric. The similarity pass is
//! quadratic, so it is skipped (and `needed_rename_limit` recorded) when
//! either candidate list exceeds the configured limit. Copy detection is
//! deliberately absent: a merge should not propagate one base file's change
//! into several targets.

use std::collections::HashMap;

use ort_odb::ObjectStore;

use crate::algorithm::{line_hash, split_lines};
use crate::tree::read_blob;
use crate::{DiffError, DiffResult, FilePair, FileStatus};

/// Convert matching delete/add pairs in `result` into renames.
pub fn detect_renames(
    store: &dyn ObjectStore,
    result: &mut DiffResult,
    threshold: u8,
    limit: usize,
) -> Result<(), DiffError> {
    let deleted: Vec<usize> = indices_with_status(&result.files, FileStatus::Deleted);
    let added: Vec<usize> = indices_with_status(&result.files, FileStatus::Added);
    if deleted.is_empty() || added.is_empty() {
        return Ok(());
    }

    let mut matched_deleted = vec![false; deleted.len()];
    let mut matched_added = vec![false; added.len()];
    // (deleted file index, added file index, similarity)
    let mut renames: Vec<(usize, usize, u8)> = Vec::new();

    // Exact pass: same blob id on both sides.
    for (di, &del_idx) in deleted.iter().enumerate() {
        let Some(del_oid) = result.files[del_idx].old_oid else {
            continue;
        };
        for (ai, &add_idx) in added.iter().enumerate() {
            if matched_added[ai] {
                continue;
            }
            if result.files[add_idx].new_oid == Some(del_oid) {
                matched_deleted[di] = true;
                matched_added[ai] = true;
                renames.push((del_idx, add_idx, 100));
                break;
            }
        }
    }

    // Similarity pass, guarded against quadratic blowup.
    let too_many = deleted.len().max(added.len());
    if too_many > limit {
        result.needed_rename_limit = result.needed_rename_limit.max(too_many);
    } else if threshold < 100 {
        for (di, &del_idx) in deleted.iter().enumerate() {
            if matched_deleted[di] {
                continue;
            }
            let Some(del_oid) = result.files[del_idx].old_oid else {
                continue;
            };
            let old_data = read_blob(store, &del_oid)?;

            let mut best: Option<(usize, u8)> = None;
            for (ai, &add_idx) in added.iter().enumerate() {
                if matched_added[ai] {
                    continue;
                }
                let Some(add_oid) = result.files[add_idx].new_oid else {
                    continue;
                };
                let new_data = read_blob(store, &add_oid)?;
                let score = similarity_score(&old_data, &new_data);
                if score >= threshold && best.map_or(true, |(_, b)| score > b) {
                    best = Some((ai, score));
                }
            }

            if let Some((ai, score)) = best {
                matched_deleted[di] = true;
                matched_added[ai] = true;
                renames.push((del_idx, added[ai], score));
            }
        }
    }

    // Fold each matched pair into the add entry and drop the delete.
    let mut consumed = vec![false; result.files.len()];
    for (del_idx, add_idx, similarity) in renames {
        let old_path = result.files[del_idx].old_path.clone();
        let old_mode = result.files[del_idx].old_mode;
        let old_oid = result.files[del_idx].old_oid;

        let add_file = &mut result.files[add_idx];
        add_file.status = FileStatus::Renamed;
        add_file.old_path = old_path;
        add_file.old_mode = old_mode;
        add_file.old_oid = old_oid;
        add_file.similarity = Some(similarity);

        consumed[del_idx] = true;
    }
    let mut keep = consumed.iter().map(|c| !c);
    result.files.retain(|_| keep.next().unwrap_or(true));

    Ok(())
}

fn indices_with_status(files: &[FilePair], status: FileStatus) -> Vec<usize> {
    files
        .iter()
        .enumerate()
        .filter(|(_, f)| f.status == status)
        .map(|(i, _)| i)
        .collect()
}

/// Similarity between two byte buffers as a 0-100 percentage:
/// `(base_size - delta_size) * 100 / base_size`, floored at zero.
pub fn similarity_score(old: &[u8], new: &[u8]) -> u8 {
    if old.is_empty() && new.is_empty() {
        return 100;
    }
    if old.is_empty() || new.is_empty() {
        return 0;
    }
    let base_size = old.len().max(new.len());
    let delta_size = unmatched_line_bytes(old, new);
    if delta_size >= base_size {
        0
    } else {
        ((base_size - delta_size) * 100 / base_size) as u8
    }
}

/// Approximate delta size: bytes of lines in either buffer without a
/// counterpart line in the other.
fn unmatched_line_bytes(old: &[u8], new: &[u8]) -> usize {
    let mut old_counts: HashMap<u64, (usize, usize)> = HashMap::new();
    for line in split_lines(old) {
        let slot = old_counts.entry(line_hash(line)).or_insert((0, line.len()));
        slot.0 += 1;
    }

    let mut unmatched = 0usize;
    for line in split_lines(new) {
        match old_counts.get_mut(&line_hash(line)) {
            Some((count, _)) if *count > 0 => *count -= 1,
            _ => unmatched += line.len(),
        }
    }
    for (count, len) in old_counts.into_values() {
        unmatched += count * len;
    }
    unmatched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_buffers_score_full() {
        assert_eq!(similarity_score(b"a\nb\n", b"a\nb\n"), 100);
    }

    #[test]
    fn disjoint_buffers_score_zero() {
        assert_eq!(similarity_score(b"aaa\nbbb\n", b"xxx\nyyy\n"), 0);
    }

    #[test]
    fn empty_edge_cases() {
        assert_eq!(similarity_score(b"", b""), 100);
        assert_eq!(similarity_score(b"x", b""), 0);
        assert_eq!(similarity_score(b"", b"x"), 0);
    }

    #[test]
    fn mostly_matching_scores_high() {
        let old = b"one\ntwo\nthree\nfour\n";
        let new = b"one\ntwo\nthree\nchanged\n";
        let score = similarity_score(old, new);
        assert!(score >= 50, "score {score} unexpectedly low");
    }
}
