//! Plackett-Luce head: one score per item, a distribution over full permutations.
//!
//! Sampling places items one at a time, each drawn from the softmax over the scores of the
//! items not placed yet. The log-probability routine [`plackett_luce_log_prob`] follows the same
//! factorization in the autodiff graph and accepts **any** permutation, not only samples drawn
//! by this head, so it also scores the mode (descending scores) and antimode (ascending scores).
//!
//! Step `t` normalizes over the items not placed yet, i.e. the suffix `σ_t..σ_n` of the
//! permutation, so every normalizer is a suffix sum of exponentiated scores.

use burn_core as burn;

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use burn_nn::{Linear, LinearConfig};
use ndarray::{Array2, Array3};

use crate::categorical::{argsort_descending, sample_plackett_luce};
use crate::codec::is_permutation;
use crate::tensor::{indices_to_tensor, tensor_to_array2};
use crate::{Error, Result};

/// Result of one PL forward pass.
#[derive(Debug, Clone)]
pub struct PlOutput<B: Backend> {
    /// Sampled permutations, `(batch, num_samples, n)`.
    pub samples: Array3<usize>,
    /// Log-probability per sample, `[batch, num_samples]`, attached to the graph.
    pub log_probs: Tensor<B, 2>,
    /// Scores `[batch, n]`, attached to the graph (for penalties on the distribution itself).
    pub scores: Tensor<B, 2>,
    /// Detached copy of `scores`.
    pub weights: Array2<f32>,
}

#[derive(Module, Debug)]
pub struct PlHead<B: Backend> {
    linear: Linear<B>,
    sample_length: usize,
}

impl<B: Backend> PlHead<B> {
    pub fn new(device: &B::Device, input_dim: usize, sample_length: usize) -> Self {
        let linear = LinearConfig::new(input_dim, sample_length).init(device);
        Self {
            linear,
            sample_length,
        }
    }

    pub fn sample_length(&self) -> usize {
        self.sample_length
    }

    /// Scores `[batch, n]` for inputs `[batch, input_dim]`.
    pub fn scores(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(x)
    }

    pub fn forward(
        &self,
        x: Tensor<B, 2>,
        num_samples: usize,
        rng: &mut impl rand::Rng,
    ) -> Result<PlOutput<B>> {
        if num_samples == 0 {
            return Err(Error::Domain("num_samples must be >= 1"));
        }
        let scores = self.scores(x);
        let weights = tensor_to_array2(scores.clone().detach())?;
        let (batch, n) = weights.dim();

        let mut samples = Array3::<usize>::zeros((batch, num_samples, n));
        for (b, row) in weights.rows().into_iter().enumerate() {
            let row = row.to_vec();
            for s in 0..num_samples {
                for (t, item) in sample_plackett_luce(&row, rng).into_iter().enumerate() {
                    samples[[b, s, t]] = item;
                }
            }
        }

        let log_probs = plackett_luce_log_prob(scores.clone(), &samples)?;
        Ok(PlOutput {
            samples,
            log_probs,
            scores,
            weights,
        })
    }
}

/// Differentiable Plackett-Luce log-probability.
///
/// - `scores`: `[batch, n]`
/// - `perms`: `(batch, k, n)`, any `k` permutations per batch row
///
/// Returns `[batch, k]`.
///
/// The graph has a fixed size in `n`: scores are gathered in permutation order, shifted by
/// their (detached) row max, and every step's normalizer \(\sum_{j \ge t} e^{s_{\sigma_j}}\) comes
/// out of one matmul against an upper-triangular ones matrix.
pub fn plackett_luce_log_prob<B: Backend>(
    scores: Tensor<B, 2>,
    perms: &Array3<usize>,
) -> Result<Tensor<B, 2>> {
    let [batch, n] = scores.dims();
    let (pb, k, pn) = perms.dim();
    if pb != batch || pn != n {
        return Err(Error::Shape("perms must be (batch, k, n) matching scores [batch, n]"));
    }
    if k == 0 || n == 0 {
        return Err(Error::Domain("need at least one permutation of length >= 1"));
    }
    for row in perms.rows() {
        if !is_permutation(&row.to_vec()) {
            return Err(Error::Domain("not a permutation"));
        }
    }

    let device = scores.device();
    let rows = batch * k;
    let owner: Vec<i64> = (0..batch)
        .flat_map(|b| std::iter::repeat(b as i64).take(k))
        .collect();
    let owner = Tensor::<B, 1, Int>::from_data(TensorData::new(owner, [rows]), &device);
    let repeated = scores.select(0, owner);

    // perms is (batch, k, n) in standard order, i.e. row r = b * k + s.
    let idx: Vec<i64> = perms.iter().map(|&x| x as i64).collect();
    let ordered = repeated.gather(1, indices_to_tensor::<B>(&device, idx, [rows, n]));

    let max = ordered.clone().max_dim(1).detach();
    let shifted = ordered - max;

    // suffix[r, t] = sum_{j >= t} exp(shifted[r, j])
    let upper: Vec<f32> = (0..n)
        .flat_map(|j| (0..n).map(move |t| if j >= t { 1.0 } else { 0.0 }))
        .collect();
    let upper = Tensor::<B, 2>::from_data(TensorData::new(upper, [n, n]), &device);
    // The clamp only matters when a score sits ~100 below the row max (f32 exp underflow).
    let suffix = shifted.clone().exp().matmul(upper).clamp_min(f32::MIN_POSITIVE);

    let lp = (shifted - suffix.log()).sum_dim(1);
    Ok(lp.reshape([batch, k]))
}

/// Mode (descending scores) and antimode (ascending scores) of each row, as `(batch, 2, n)`.
pub fn mode_and_antimode(weights: &Array2<f32>) -> Array3<usize> {
    let (batch, n) = weights.dim();
    let mut out = Array3::<usize>::zeros((batch, 2, n));
    for (b, row) in weights.rows().into_iter().enumerate() {
        let mode = argsort_descending(&row.to_vec());
        for (t, &item) in mode.iter().enumerate() {
            out[[b, 0, t]] = item;
            out[[b, 1, n - 1 - t]] = item;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorical;
    use crate::categorical::tests::all_permutations;
    use crate::tensor::tensor_to_vec;
    use crate::BurnBackend;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type B = NdArray<f32>;

    fn scores_tensor(rows: &[Vec<f32>]) -> Tensor<B, 2> {
        let n = rows[0].len();
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_data(TensorData::new(flat, [rows.len(), n]), &Default::default())
    }

    fn stack_perms(batch: usize, perms: &[Vec<usize>]) -> Array3<usize> {
        let n = perms[0].len();
        let mut out = Array3::<usize>::zeros((batch, perms.len(), n));
        for b in 0..batch {
            for (s, p) in perms.iter().enumerate() {
                for (t, &x) in p.iter().enumerate() {
                    out[[b, s, t]] = x;
                }
            }
        }
        out
    }

    #[test]
    fn probabilities_over_all_permutations_sum_to_one() {
        for n in [3usize, 4] {
            let rows = vec![
                (0..n).map(|i| 0.7 * i as f32 - 1.0).collect::<Vec<f32>>(),
                (0..n).map(|i| ((i * 7 % 5) as f32).sin() * 2.0).collect(),
            ];
            let perms = all_permutations(n);
            let lps =
                plackett_luce_log_prob(scores_tensor(&rows), &stack_perms(2, &perms)).unwrap();
            let lps = tensor_to_vec(lps).unwrap();
            for b in 0..2 {
                let chunk = &lps[b * perms.len()..(b + 1) * perms.len()];
                assert!(chunk.iter().all(|&lp| lp <= 1e-6));
                let total: f64 = chunk.iter().map(|&lp| (lp as f64).exp()).sum();
                assert!((total - 1.0).abs() < 1e-4, "n={n} b={b} total={total}");
            }
        }
    }

    #[test]
    fn tensor_log_prob_matches_host_computation() {
        let row = vec![1.5f32, -0.3, 0.0, 2.2, -1.0];
        let perms = vec![vec![3, 0, 2, 1, 4], vec![4, 1, 2, 0, 3]];
        let lps = plackett_luce_log_prob(scores_tensor(&[row.clone()]), &stack_perms(1, &perms))
            .unwrap();
        let lps = tensor_to_vec(lps).unwrap();
        for (s, p) in perms.iter().enumerate() {
            let host = categorical::plackett_luce_log_prob(&row, p).unwrap();
            assert!((lps[s] as f64 - host).abs() < 1e-4);
        }
    }

    #[test]
    fn long_permutations_match_host_computation_per_batch_row() {
        let n = 60;
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let rows: Vec<Vec<f32>> = (0..2)
            .map(|b| (0..n).map(|i| ((i * 37 + b * 11) % 23) as f32 * 0.5 - 6.0).collect())
            .collect();
        let k = 3;
        let mut perms = Array3::<usize>::zeros((2, k, n));
        for (b, row) in rows.iter().enumerate() {
            for s in 0..k {
                for (t, item) in sample_plackett_luce(row, &mut rng).into_iter().enumerate() {
                    perms[[b, s, t]] = item;
                }
            }
        }

        let lps = tensor_to_vec(plackett_luce_log_prob(scores_tensor(&rows), &perms).unwrap())
            .unwrap();
        for b in 0..2 {
            for s in 0..k {
                let p: Vec<usize> = (0..n).map(|t| perms[[b, s, t]]).collect();
                let host = categorical::plackett_luce_log_prob(&rows[b], &p).unwrap();
                let got = lps[b * k + s] as f64;
                assert!(
                    (got - host).abs() < 5e-3 + 1e-4 * host.abs(),
                    "b={b} s={s}: got {got}, host {host}"
                );
            }
        }
    }

    #[test]
    fn sampled_permutations_are_valid() {
        let device = Default::default();
        let head = PlHead::<B>::new(&device, 6, 4);
        let x = Tensor::<B, 2>::random([5, 6], Distribution::Normal(0.0, 1.0), &device);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let out = head.forward(x, 16, &mut rng).unwrap();
        assert_eq!(out.samples.dim(), (5, 16, 4));
        assert_eq!(out.log_probs.dims(), [5, 16]);
        assert_eq!(out.weights.dim(), (5, 4));
        for row in out.samples.rows() {
            assert!(is_permutation(&row.to_vec()));
        }
    }

    #[test]
    fn mode_scores_at_least_antimode() {
        let rows = vec![vec![0.2f32, 1.4, -0.9, 0.5], vec![-2.0f32, 0.0, 3.0, 1.0]];
        let weights = Array2::from_shape_vec((2, 4), rows.concat()).unwrap();
        let ma = mode_and_antimode(&weights);
        assert_eq!(ma.index_axis(ndarray::Axis(0), 0).row(0).to_vec(), vec![1, 3, 0, 2]);
        assert_eq!(ma.index_axis(ndarray::Axis(0), 0).row(1).to_vec(), vec![2, 0, 3, 1]);
        let lps = plackett_luce_log_prob(scores_tensor(&rows), &ma).unwrap();
        let lps = tensor_to_vec(lps).unwrap();
        assert!(lps[0] > lps[1]);
        assert!(lps[2] > lps[3]);
    }

    #[test]
    fn rejects_invalid_permutations_and_shapes() {
        let s = scores_tensor(&[vec![0.0, 1.0, 2.0]]);
        assert!(plackett_luce_log_prob(s.clone(), &stack_perms(1, &[vec![0, 0, 2]])).is_err());
        assert!(plackett_luce_log_prob(s, &stack_perms(2, &[vec![0, 1, 2]])).is_err());
    }

    #[test]
    fn masking_keeps_gradients_finite() {
        let device = Default::default();
        let head = PlHead::<BurnBackend>::new(&device, 3, 5);
        let x = Tensor::<BurnBackend, 2>::random([2, 3], Distribution::Normal(0.0, 1.0), &device);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let out = head.forward(x, 4, &mut rng).unwrap();
        let grads = out.log_probs.sum().backward();
        let g = head
            .linear
            .weight
            .val()
            .grad(&grads)
            .expect("weight gradient");
        let g = tensor_to_vec(g).unwrap();
        assert!(g.iter().all(|v| v.is_finite()));
        assert!(g.iter().any(|&v| v != 0.0));
    }
}
