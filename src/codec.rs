//! Permutation codec: Marina vectors, permutations, inverses.
//!
//! A Marina vector `v` of length `n` satisfies `v[i] < n - i`. Decoding reads it as
//! "at step `i`, take the `v[i]`-th smallest element still available". The map is a bijection
//! between the `n!` Marina vectors and the `n!` permutations of `0..n`.
//!
//! The UMD head samples Marina vectors in position → job form; the PFSP oracle reads
//! job → position form, so the training loop decodes with [`marina_to_permutation`] and then
//! applies [`inverse_permutation`].

use crate::{Error, Result};
use ndarray::{Array2, ArrayView2};

/// `true` iff `p` contains each of `0..p.len()` exactly once.
pub fn is_permutation(p: &[usize]) -> bool {
    let mut seen = vec![false; p.len()];
    for &x in p {
        if x >= p.len() || seen[x] {
            return false;
        }
        seen[x] = true;
    }
    true
}

/// Decode a Marina vector into a permutation.
pub fn marina_to_permutation(v: &[usize]) -> Result<Vec<usize>> {
    let n = v.len();
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut perm = Vec::with_capacity(n);
    for (i, &choice) in v.iter().enumerate() {
        if choice >= n - i {
            return Err(Error::Domain("marina index out of range for its position"));
        }
        perm.push(remaining.remove(choice));
    }
    Ok(perm)
}

/// Encode a permutation as its Marina vector.
///
/// `v[i]` is the number of elements after position `i` that are smaller than `p[i]`, which is
/// exactly the rank of `p[i]` among the elements still available at step `i`.
pub fn permutation_to_marina(p: &[usize]) -> Result<Vec<usize>> {
    if !is_permutation(p) {
        return Err(Error::Domain("not a permutation"));
    }
    Ok((0..p.len())
        .map(|i| p[i + 1..].iter().filter(|&&q| q < p[i]).count())
        .collect())
}

/// Functional inverse: `inv[p[i]] = i`.
pub fn inverse_permutation(p: &[usize]) -> Result<Vec<usize>> {
    if !is_permutation(p) {
        return Err(Error::Domain("not a permutation"));
    }
    let mut inv = vec![0usize; p.len()];
    for (i, &x) in p.iter().enumerate() {
        inv[x] = i;
    }
    Ok(inv)
}

/// Row-wise [`marina_to_permutation`].
pub fn marina_to_permutation_batch(vs: &ArrayView2<usize>) -> Result<Array2<usize>> {
    map_rows(vs, marina_to_permutation)
}

/// Row-wise [`inverse_permutation`].
pub fn inverse_permutation_batch(ps: &ArrayView2<usize>) -> Result<Array2<usize>> {
    map_rows(ps, inverse_permutation)
}

fn map_rows(
    xs: &ArrayView2<usize>,
    f: impl Fn(&[usize]) -> Result<Vec<usize>>,
) -> Result<Array2<usize>> {
    let (rows, n) = xs.dim();
    let mut out = Array2::<usize>::zeros((rows, n));
    for (r, row) in xs.rows().into_iter().enumerate() {
        let mapped = f(&row.to_vec())?;
        for (k, x) in mapped.into_iter().enumerate() {
            out[[r, k]] = x;
        }
    }
    Ok(out)
}
