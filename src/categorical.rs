//! Plain-array categorical and Plackett-Luce primitives.
//!
//! The heads draw their discrete samples on the host from **detached** logits with these helpers,
//! then recompute log-probabilities in the autodiff graph from the same logits. Keeping the
//! sampling math here (and tested here) is what lets the two stay consistent.
//!
//! All reductions promote to `f64`.

use crate::codec::is_permutation;
use crate::{Error, Result};

pub(crate) fn sample_categorical_from_probs(probs: &[f32], rng: &mut impl rand::Rng) -> usize {
    debug_assert!(!probs.is_empty());
    debug_assert!(probs.iter().all(|&x| x >= 0.0 && x.is_finite()));
    // Roundoff can leave the cumulative sum below 1.0: fall back to the last positive index.
    let u: f32 = rng.random();
    let mut acc = 0.0f32;
    let mut last_positive = 0usize;
    for (idx, &p) in probs.iter().enumerate() {
        if p > 0.0 {
            last_positive = idx;
        }
        acc += p;
        if u < acc {
            return idx;
        }
    }
    last_positive
}

/// Numerically stable `log_softmax`.
///
/// Entries equal to `-inf` are treated as masked out and keep log-probability `-inf`.
pub fn log_softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .copied()
        .filter(|x| x.is_finite())
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let lse = logits
        .iter()
        .map(|&x| (x as f64 - max).exp())
        .sum::<f64>()
        .ln()
        + max;
    logits.iter().map(|&x| x as f64 - lse).collect()
}

/// Numerically stable softmax, returned as `f32` probabilities.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    log_softmax(logits)
        .into_iter()
        .map(|lp| lp.exp() as f32)
        .collect()
}

/// Draw one index from `Categorical(logits = logits)`.
pub fn sample_categorical(logits: &[f32], rng: &mut impl rand::Rng) -> usize {
    let probs = softmax(logits);
    sample_categorical_from_probs(&probs, rng)
}

/// Shannon entropy (nats) of a probability vector. Zero entries contribute nothing.
pub fn entropy(probs: &[f64]) -> f64 {
    probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum()
}

/// Draw one permutation from the Plackett-Luce distribution with the given scores.
///
/// At every step the next item is drawn from the softmax over the scores of the items that
/// have not been placed yet; placed items are masked with `-inf`.
pub fn sample_plackett_luce(scores: &[f32], rng: &mut impl rand::Rng) -> Vec<usize> {
    let n = scores.len();
    let mut masked = scores.to_vec();
    let mut perm = Vec::with_capacity(n);
    for _ in 0..n {
        let j = sample_categorical(&masked, rng);
        perm.push(j);
        masked[j] = f32::NEG_INFINITY;
    }
    perm
}

/// Exact Plackett-Luce log-probability of an arbitrary permutation.
///
/// \[
/// \log P(\sigma) = \sum_{t=0}^{n-1} \Big( s_{\sigma_t} - \log \sum_{k \ge t} e^{s_{\sigma_k}} \Big)
/// \]
pub fn plackett_luce_log_prob(scores: &[f32], perm: &[usize]) -> Result<f64> {
    if perm.len() != scores.len() {
        return Err(Error::Shape("permutation length must match number of scores"));
    }
    if !is_permutation(perm) {
        return Err(Error::Domain("not a permutation"));
    }
    let mut masked = scores.to_vec();
    let mut logp = 0.0f64;
    for &item in perm {
        logp += log_softmax(&masked)[item];
        masked[item] = f32::NEG_INFINITY;
    }
    Ok(logp)
}

/// Order items by descending score (the Plackett-Luce mode). Ties keep index order.
pub fn argsort_descending(scores: &[f32]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..scores.len()).collect();
    idx.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    idx
}
