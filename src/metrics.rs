//! Convergence diagnostics for the generative heads (small + explicit).
//!
//! Nothing here feeds the gradient. These scalars are logged per iteration to see whether a
//! distribution is collapsing toward a single permutation:
//!
//! - **normalized entropy**: entropy of a categorical divided by `ln(k)` (1 = uniform, 0 = point mass)
//! - **PL convergence profile**: the normalized entropy of the Plackett-Luce first-choice
//!   distribution, recomputed after removing the most likely item, step by step
//! - **mode / antimode log-probability** and the mode-vs-uniform gap of a PL distribution

use ndarray::Array2;

use crate::categorical::{argsort_descending, entropy, plackett_luce_log_prob, softmax};
use crate::model::Distributions;
use crate::Result;

/// Added to every probability of a convergence step before renormalizing.
pub const CONVERGENCE_EPS: f64 = 1e-12;

/// `entropy(p) / ln(len(p))`; 0 for single-choice distributions.
pub fn normalized_entropy(probs: &[f64]) -> f64 {
    if probs.len() < 2 {
        return 0.0;
    }
    entropy(probs) / (probs.len() as f64).ln()
}

/// Normalized entropies of the PL first-choice distribution as items are removed in
/// descending-score order. Returns `n - 1` values (the last step has a single item).
pub fn plackett_luce_convergence_profile(scores: &[f32]) -> Vec<f64> {
    let n = scores.len();
    if n < 2 {
        return Vec::new();
    }
    let order = argsort_descending(scores);
    let mut out = Vec::with_capacity(n - 1);
    for i in 0..n - 1 {
        let remaining: Vec<f32> = order[i..].iter().map(|&j| scores[j]).collect();
        let w: Vec<f64> = softmax(&remaining)
            .into_iter()
            .map(|p| p as f64 + CONVERGENCE_EPS)
            .collect();
        let total: f64 = w.iter().sum();
        let p: Vec<f64> = w.iter().map(|&x| x / total).collect();
        out.push(normalized_entropy(&p));
    }
    out
}

/// Mean over the batch of the mean PL convergence profile.
pub fn plackett_luce_convergence(weights: &Array2<f32>) -> f64 {
    mean(weights.rows().into_iter().map(|row| {
        let profile = plackett_luce_convergence_profile(&row.to_vec());
        mean(profile.into_iter())
    }))
}

/// Mean normalized entropy over every non-degenerate UMD position and batch row.
pub fn umd_convergence(logits: &[Array2<f32>]) -> f64 {
    mean(
        logits
            .iter()
            .filter(|l| l.ncols() > 1)
            .flat_map(|l| l.rows().into_iter())
            .map(|row| {
                let p: Vec<f64> = softmax(&row.to_vec()).into_iter().map(f64::from).collect();
                normalized_entropy(&p)
            }),
    )
}

/// Per-row log-probabilities of the PL mode and antimode.
pub fn mode_antimode_log_probs(weights: &Array2<f32>) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut modes = Vec::with_capacity(weights.nrows());
    let mut antimodes = Vec::with_capacity(weights.nrows());
    for row in weights.rows() {
        let row = row.to_vec();
        let mode = argsort_descending(&row);
        let antimode: Vec<usize> = mode.iter().rev().copied().collect();
        modes.push(plackett_luce_log_prob(&row, &mode)?);
        antimodes.push(plackett_luce_log_prob(&row, &antimode)?);
    }
    Ok((modes, antimodes))
}

/// Mean over rows of `max(P(mode) - 1/n, P(antimode) - 1/n)`.
pub fn mode_uniform_gap(weights: &Array2<f32>) -> Result<f64> {
    let v = 1.0 / weights.ncols().max(1) as f64;
    let (modes, antimodes) = mode_antimode_log_probs(weights)?;
    Ok(mean(
        modes
            .iter()
            .zip(&antimodes)
            .map(|(&m, &a)| (m.exp() - v).max(a.exp() - v)),
    ))
}

/// L2 norm of the batch-mean score vector.
pub fn mean_weight_l2(weights: &Array2<f32>) -> f64 {
    let rows = weights.nrows().max(1) as f64;
    weights
        .columns()
        .into_iter()
        .map(|c| {
            let m = c.iter().map(|&x| x as f64).sum::<f64>() / rows;
            m * m
        })
        .sum::<f64>()
        .sqrt()
}

/// Diagnostics reported for one forward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Diagnostics {
    /// Normalized-entropy convergence measure (1 = uniform).
    pub convergence: f64,
    /// Mean log-probability of the PL mode (PL only).
    pub mode_log_prob: Option<f64>,
    /// Mode-vs-uniform gap (PL only).
    pub mode_gap: Option<f64>,
    /// L2 norm of the batch-mean score vector (PL only).
    pub weight_l2: Option<f64>,
}

pub fn diagnose(distributions: &Distributions) -> Result<Diagnostics> {
    match distributions {
        Distributions::PerPosition(logits) => Ok(Diagnostics {
            convergence: umd_convergence(logits),
            ..Default::default()
        }),
        Distributions::Scores(weights) => {
            let (modes, _) = mode_antimode_log_probs(weights)?;
            Ok(Diagnostics {
                convergence: plackett_luce_convergence(weights),
                mode_log_prob: Some(mean(modes.into_iter())),
                mode_gap: Some(mode_uniform_gap(weights)?),
                weight_l2: Some(mean_weight_l2(weights)),
            })
        }
    }
}

fn mean(xs: impl Iterator<Item = f64>) -> f64 {
    let (s, k) = xs.fold((0.0, 0usize), |(s, k), x| (s + x, k + 1));
    if k == 0 {
        0.0
    } else {
        s / k as f64
    }
}
