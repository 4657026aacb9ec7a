//! Edit scripts between two item sequences.
//!
//! Used by [`ObservableList::replace`](super::ObservableList::replace) to
//! turn a wholesale replacement into the smallest set of splices, so
//! listeners only hear about the items that actually changed.
//!
//! Common prefix and suffix are trimmed first. The middle is aligned with a
//! longest-common-subsequence table; when the table would exceed the
//! configured cell limit, the middle is replaced with a single splice.

use crate::value::Value;

/// One splice of an edit script.
///
/// Indices refer to the sequence as left by the preceding ops, so a script
/// is applied front to back.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SpliceOp {
    pub index: usize,
    pub delete_count: usize,
    pub insert: Vec<Value>,
}

impl SpliceOp {
    fn is_empty(&self) -> bool {
        self.delete_count == 0 && self.insert.is_empty()
    }
}

/// Splices that turn `old` into `new`, compared by identity.
pub(crate) fn edit_script(old: &[Value], new: &[Value], cell_limit: usize) -> Vec<SpliceOp> {
    let prefix = old
        .iter()
        .zip(new)
        .take_while(|(a, b)| a.same(b))
        .count();
    let (old_rest, new_rest) = (&old[prefix..], &new[prefix..]);
    let suffix = old_rest
        .iter()
        .rev()
        .zip(new_rest.iter().rev())
        .take_while(|(a, b)| a.same(b))
        .count();
    let old_mid = &old_rest[..old_rest.len() - suffix];
    let new_mid = &new_rest[..new_rest.len() - suffix];

    if old_mid.is_empty() && new_mid.is_empty() {
        return Vec::new();
    }
    if old_mid.is_empty()
        || new_mid.is_empty()
        || old_mid.len().saturating_mul(new_mid.len()) > cell_limit
    {
        return vec![SpliceOp {
            index: prefix,
            delete_count: old_mid.len(),
            insert: new_mid.to_vec(),
        }];
    }
    align(old_mid, new_mid, prefix)
}

/// LCS alignment of two non-empty slices. `base` is added to every index.
fn align(old: &[Value], new: &[Value], base: usize) -> Vec<SpliceOp> {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;
    // table[i * width + j]: LCS length of old[i..] and new[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if old[i].same(&new[j]) {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let mut pending: Option<SpliceOp> = None;
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && old[i].same(&new[j]) {
            ops.extend(pending.take().filter(|op| !op.is_empty()));
            i += 1;
            j += 1;
            continue;
        }
        let op = pending.get_or_insert_with(|| SpliceOp {
            index: base + j,
            delete_count: 0,
            insert: Vec::new(),
        });
        if j < m && (i == n || table[i * width + j + 1] >= table[(i + 1) * width + j]) {
            op.insert.push(new[j].clone());
            j += 1;
        } else {
            op.delete_count += 1;
            i += 1;
        }
    }
    ops.extend(pending.filter(|op| !op.is_empty()));
    ops
}
