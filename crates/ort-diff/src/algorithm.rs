//! Line-level diff: Myers O(ND) edit scripts over byte lines.
//!
//! The merge engine uses edit scripts in two places: the three-way content
//! merger (base→side1 and base→side2 scripts interleaved into a merged
//! file) and the rename similarity scorer.

use crate::DiffAlgorithm;

/// An edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    /// Line present in both sequences.
    Equal,
    /// Line present only in the new sequence.
    Insert,
    /// Line present only in the old sequence.
    Delete,
}

/// A single edit, referencing lines by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    pub op: EditOp,
    /// Index into the old sequence (meaningful for Equal and Delete).
    pub old_index: usize,
    /// Index into the new sequence (meaningful for Equal and Insert).
    pub new_index: usize,
}

/// Compute a line-level edit script from `old` to `new`.
pub fn diff_edits(old: &[u8], new: &[u8], algorithm: DiffAlgorithm) -> Vec<Edit> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    myers(&old_lines, &new_lines, algorithm == DiffAlgorithm::Minimal)
}

/// Split bytes into lines, keeping line terminators attached.
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &byte) in data.iter().enumerate() {
        if byte == b'\n' {
            lines.push(&data[start..=i]);
            start = i + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

/// DJB2a line hash for O(1) inequality checks, as in xdiff.
pub(crate) fn line_hash(line: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in line {
        hash = hash.wrapping_mul(33) ^ (b as u64);
    }
    hash
}

/// Myers O(ND) diff with common-affix trimming.
///
/// `minimal` disables nothing today beyond the naming contract: the search
/// always runs to the exact minimum D. The flag is kept so a bounded
/// heuristic can be slotted in without an API change.
pub fn myers(old: &[&[u8]], new: &[&[u8]], minimal: bool) -> Vec<Edit> {
    if old.is_empty() || new.is_empty() {
        return trivial_edits(old.len(), new.len());
    }

    let old_hashes: Vec<u64> = old.iter().map(|l| line_hash(l)).collect();
    let new_hashes: Vec<u64> = new.iter().map(|l| line_hash(l)).collect();

    // Trim the common prefix and suffix before the quadratic search.
    let prefix_len = old_hashes
        .iter()
        .zip(&new_hashes)
        .zip(old.iter().zip(new.iter()))
        .take_while(|((oh, nh), (a, b))| oh == nh && a == b)
        .count();
    let suffix_len = old_hashes[prefix_len..]
        .iter()
        .rev()
        .zip(new_hashes[prefix_len..].iter().rev())
        .zip(
            old[prefix_len..]
                .iter()
                .rev()
                .zip(new[prefix_len..].iter().rev()),
        )
        .take_while(|((oh, nh), (a, b))| oh == nh && a == b)
        .count();

    let inner = myers_inner(
        &old[prefix_len..old.len() - suffix_len],
        &new[prefix_len..new.len() - suffix_len],
        &old_hashes[prefix_len..old_hashes.len() - suffix_len],
        &new_hashes[prefix_len..new_hashes.len() - suffix_len],
        minimal,
    );

    let mut edits = Vec::with_capacity(old.len() + new.len());
    for i in 0..prefix_len {
        edits.push(Edit {
            op: EditOp::Equal,
            old_index: i,
            new_index: i,
        });
    }
    for edit in inner {
        edits.push(Edit {
            op: edit.op,
            old_index: edit.old_index + prefix_len,
            new_index: edit.new_index + prefix_len,
        });
    }
    for i in 0..suffix_len {
        edits.push(Edit {
            op: EditOp::Equal,
            old_index: old.len() - suffix_len + i,
            new_index: new.len() - suffix_len + i,
        });
    }
    edits
}

fn trivial_edits(old_len: usize, new_len: usize) -> Vec<Edit> {
    if old_len == 0 {
        (0..new_len)
            .map(|j| Edit {
                op: EditOp::Insert,
                old_index: 0,
                new_index: j,
            })
            .collect()
    } else {
        (0..old_len)
            .map(|i| Edit {
                op: EditOp::Delete,
                old_index: i,
                new_index: 0,
            })
            .collect()
    }
}

/// Greedy forward Myers search on the trimmed sequences, keeping the full
/// trace for backtracking.
fn myers_inner(
    old: &[&[u8]],
    new: &[&[u8]],
    old_h: &[u64],
    new_h: &[u64],
    _minimal: bool,
) -> Vec<Edit> {
    let n = old.len();
    let m = new.len();
    if n == 0 || m == 0 {
        return trivial_edits(n, m);
    }

    let max_d = n + m;
    let v_offset = max_d as isize;
    let mut trace: Vec<Vec<usize>> = Vec::new();
    let mut v = vec![0usize; 2 * max_d + 1];

    'outer: for d in 0..=max_d {
        let mut v_next = v.clone();
        let mut k = -(d as isize);
        while k <= d as isize {
            let go_down = k == -(d as isize)
                || (k != d as isize
                    && v[((k - 1) + v_offset) as usize] < v[((k + 1) + v_offset) as usize]);
            let mut x = if go_down {
                v[((k + 1) + v_offset) as usize]
            } else {
                v[((k - 1) + v_offset) as usize] + 1
            };
            let mut y = (x as isize - k) as usize;

            // Follow the snake.
            while x < n && y < m && old_h[x] == new_h[y] && old[x] == new[y] {
                x += 1;
                y += 1;
            }
            v_next[(k + v_offset) as usize] = x;

            if x >= n && y >= m {
                trace.push(v_next);
                break 'outer;
            }
            k += 2;
        }
        trace.push(v_next);
        v = trace.last().expect("trace is non-empty").clone();
    }

    backtrack(&trace, n, m, v_offset)
}

fn backtrack(trace: &[Vec<usize>], n: usize, m: usize, v_offset: isize) -> Vec<Edit> {
    let mut edits = Vec::new();
    let mut x = n;
    let mut y = m;

    for d in (0..trace.len()).rev() {
        let k = x as isize - y as isize;
        let prev_k = if d == 0 {
            k
        } else if k == -(d as isize)
            || (k != d as isize
                && trace[d - 1][((k - 1) + v_offset) as usize]
                    < trace[d - 1][((k + 1) + v_offset) as usize])
        {
            k + 1
        } else {
            k - 1
        };
        let prev_x = if d == 0 {
            0
        } else {
            trace[d - 1][(prev_k + v_offset) as usize]
        };
        let prev_y = (prev_x as isize - prev_k) as usize;

        while x > prev_x && y > prev_y && x > 0 && y > 0 {
            x -= 1;
            y -= 1;
            edits.push(Edit {
                op: EditOp::Equal,
                old_index: x,
                new_index: y,
            });
        }

        if d > 0 {
            if prev_k == k + 1 {
                if y > 0 {
                    y -= 1;
                    edits.push(Edit {
                        op: EditOp::Insert,
                        old_index: x,
                        new_index: y,
                    });
                }
            } else if x > 0 {
                x -= 1;
                edits.push(Edit {
                    op: EditOp::Delete,
                    old_index: x,
                    new_index: y,
                });
            }
        }
    }

    edits.reverse();
    edits
}
