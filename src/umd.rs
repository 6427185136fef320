//! Univariate marginal (UMD) head: `n` independent categoricals with shrinking support.
//!
//! Position `i` (0-indexed) has a categorical over `n - i` choices, so one draw per position
//! yields a Marina vector (see [`crate::codec`]). Given the head input, positions are
//! independent, which makes the joint log-probability the plain sum of per-position terms.
//!
//! Sampling happens on the host from the detached (transformed) logits; the log-probability of
//! each draw is then gathered from an in-graph `log_softmax` of the **same** logits. The last
//! position is degenerate (support 1, log-probability 0) but is still computed so factor
//! indices line up with positions.

use burn_core as burn;

use burn::module::Module;
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn_nn::{Linear, LinearConfig, Relu};
use ndarray::{Array2, Array3};

use crate::categorical::{sample_categorical_from_probs, softmax};
use crate::logits::{Identity, LogitTransform};
use crate::tensor::{indices_to_tensor, tensor_to_array2};
use crate::{Error, Result};

/// Input to a per-position stage: one tensor shared by every position, or one per position.
#[derive(Debug, Clone)]
pub enum HeadInput<B: Backend> {
    /// `[batch, d]`, broadcast to all positions.
    Shared(Tensor<B, 2>),
    /// Exactly one `[batch, d]` tensor per position.
    PerPosition(Vec<Tensor<B, 2>>),
}

impl<B: Backend> HeadInput<B> {
    /// Expand into exactly `n` per-position tensors.
    pub fn into_positions(self, n: usize) -> Result<Vec<Tensor<B, 2>>> {
        match self {
            HeadInput::Shared(x) => Ok(vec![x; n]),
            HeadInput::PerPosition(xs) => {
                if xs.len() != n {
                    return Err(Error::Shape(
                        "per-position input length must match the number of positions",
                    ));
                }
                Ok(xs)
            }
        }
    }
}

/// `n` independent `Linear + ReLU` layers, one per position.
#[derive(Module, Debug)]
pub struct LinearParallel<B: Backend> {
    linears: Vec<Linear<B>>,
}

impl<B: Backend> LinearParallel<B> {
    pub fn new(device: &B::Device, num_linears: usize, in_dim: usize, out_dim: usize) -> Self {
        let linears = (0..num_linears)
            .map(|_| LinearConfig::new(in_dim, out_dim).init(device))
            .collect();
        Self { linears }
    }

    pub fn num_linears(&self) -> usize {
        self.linears.len()
    }

    /// Returns exactly `num_linears` activations.
    pub fn forward(&self, input: HeadInput<B>) -> Result<Vec<Tensor<B, 2>>> {
        let xs = input.into_positions(self.linears.len())?;
        Ok(self
            .linears
            .iter()
            .zip(xs)
            .map(|(linear, x)| Relu.forward(linear.forward(x)))
            .collect())
    }
}

/// Result of one UMD forward pass.
#[derive(Debug, Clone)]
pub struct UmdOutput<B: Backend> {
    /// Marina vectors, `(batch, num_samples, n)`; entry `[b, s, i]` is `< n - i`.
    pub samples: Array3<usize>,
    /// Joint log-probability per sample, `[batch, num_samples]`, attached to the graph.
    pub log_probs: Tensor<B, 2>,
    /// Detached per-position logits; position `i` is `(batch, n - i)`.
    pub logits: Vec<Array2<f32>>,
}

/// The UMD head: position `i` projects its input to `n - i` logits.
#[derive(Module, Debug)]
pub struct UmdHead<B: Backend> {
    out_layers: Vec<Linear<B>>,
    input_dim: usize,
}

impl<B: Backend> UmdHead<B> {
    pub fn new(device: &B::Device, input_dim: usize, sample_length: usize) -> Self {
        let out_layers = (0..sample_length)
            .map(|i| LinearConfig::new(input_dim, sample_length - i).init(device))
            .collect();
        Self {
            out_layers,
            input_dim,
        }
    }

    /// Number of positions `n`.
    pub fn sample_length(&self) -> usize {
        self.out_layers.len()
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Forward with raw logits.
    pub fn forward(
        &self,
        input: HeadInput<B>,
        num_samples: usize,
        rng: &mut impl rand::Rng,
    ) -> Result<UmdOutput<B>> {
        self.forward_with(input, num_samples, &Identity, rng)
    }

    /// Forward with a logit transform applied before each categorical is built.
    pub fn forward_with<T: LogitTransform>(
        &self,
        input: HeadInput<B>,
        num_samples: usize,
        transform: &T,
        rng: &mut impl rand::Rng,
    ) -> Result<UmdOutput<B>> {
        if num_samples == 0 {
            return Err(Error::Domain("num_samples must be >= 1"));
        }
        let n = self.sample_length();
        let xs = input.into_positions(n)?;
        let batch = xs.first().map(|x| x.dims()[0]).unwrap_or(0);
        if xs.iter().any(|x| x.dims() != [batch, self.input_dim]) {
            return Err(Error::Shape("UMD head input must be [batch, input_dim]"));
        }

        let mut samples = Array3::<usize>::zeros((batch, num_samples, n));
        let mut logits_out = Vec::with_capacity(n);
        let mut log_probs: Option<Tensor<B, 2>> = None;

        for (i, (linear, x)) in self.out_layers.iter().zip(xs).enumerate() {
            let device = x.device();
            let logits = transform.transform(linear.forward(x));
            let snapshot = tensor_to_array2(logits.clone().detach())?;
            debug_assert_eq!(snapshot.ncols(), n - i);

            let mut idx = Vec::with_capacity(batch * num_samples);
            for (b, row) in snapshot.rows().into_iter().enumerate() {
                let probs = softmax(&row.to_vec());
                for s in 0..num_samples {
                    let j = sample_categorical_from_probs(&probs, rng);
                    samples[[b, s, i]] = j;
                    idx.push(j as i64);
                }
            }

            let idx = indices_to_tensor::<B>(&device, idx, [batch, num_samples]);
            let lp = log_softmax(logits, 1).gather(1, idx);
            log_probs = Some(match log_probs {
                Some(acc) => acc + lp,
                None => lp,
            });
            logits_out.push(snapshot);
        }

        let log_probs = log_probs.ok_or(Error::Domain("UMD head needs at least one position"))?;
        Ok(UmdOutput {
            samples,
            log_probs,
            logits: logits_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorical;
    use crate::codec::{is_permutation, marina_to_permutation};
    use crate::logits::LogitReshape;
    use crate::tensor::tensor_to_vec;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type B = NdArray<f32>;

    fn noise(batch: usize, d: usize) -> Tensor<B, 2> {
        Tensor::<B, 2>::random([batch, d], Distribution::Normal(0.0, 1.0), &Default::default())
    }

    #[test]
    fn support_shrinks_by_one_per_position() {
        let device = Default::default();
        let head = UmdHead::<B>::new(&device, 8, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let out = head
            .forward(HeadInput::Shared(noise(3, 8)), 7, &mut rng)
            .unwrap();

        assert_eq!(out.samples.dim(), (3, 7, 5));
        assert_eq!(out.log_probs.dims(), [3, 7]);
        assert_eq!(out.logits.len(), 5);
        for (i, l) in out.logits.iter().enumerate() {
            assert_eq!(l.dim(), (3, 5 - i));
        }
        for b in 0..3 {
            for s in 0..7 {
                for i in 0..5 {
                    assert!(out.samples[[b, s, i]] < 5 - i);
                }
                let v: Vec<usize> = (0..5).map(|i| out.samples[[b, s, i]]).collect();
                assert!(is_permutation(&marina_to_permutation(&v).unwrap()));
            }
        }
    }

    #[test]
    fn log_prob_matches_independent_recomputation() {
        let device = Default::default();
        let head = UmdHead::<B>::new(&device, 6, 6);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for reshape in [LogitReshape::Identity, LogitReshape::LogNormalization] {
            let out = head
                .forward_with(HeadInput::Shared(noise(4, 6)), 5, &reshape, &mut rng)
                .unwrap();
            let lps = tensor_to_vec(out.log_probs.clone()).unwrap();
            for b in 0..4 {
                for s in 0..5 {
                    let mut expected = 0.0f64;
                    for (i, logits) in out.logits.iter().enumerate() {
                        let row = logits.row(b).to_vec();
                        expected += categorical::log_softmax(&row)[out.samples[[b, s, i]]];
                    }
                    let got = lps[b * 5 + s] as f64;
                    assert!(
                        (got - expected).abs() < 1e-4,
                        "b={b} s={s}: got {got}, expected {expected}"
                    );
                    assert!(got <= 1e-6);
                }
            }
        }
    }

    #[test]
    fn last_position_is_degenerate() {
        let device = Default::default();
        let head = UmdHead::<B>::new(&device, 4, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let out = head
            .forward(HeadInput::Shared(noise(2, 4)), 4, &mut rng)
            .unwrap();
        let last = out.logits.last().unwrap();
        assert_eq!(last.ncols(), 1);
        assert!(out.samples.index_axis(ndarray::Axis(2), 2).iter().all(|&j| j == 0));

        // the joint log-prob is carried entirely by the first n - 1 positions
        let lps = tensor_to_vec(out.log_probs.clone()).unwrap();
        for b in 0..2 {
            assert_eq!(categorical::log_softmax(&last.row(b).to_vec())[0], 0.0);
            for s in 0..4 {
                let mut leading = 0.0f64;
                for (i, l) in out.logits[..2].iter().enumerate() {
                    leading += categorical::log_softmax(&l.row(b).to_vec())[out.samples[[b, s, i]]];
                }
                assert!((lps[b * 4 + s] as f64 - leading).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn per_position_input_length_is_checked() {
        let device = Default::default();
        let head = UmdHead::<B>::new(&device, 4, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let short = HeadInput::PerPosition(vec![noise(2, 4), noise(2, 4)]);
        assert!(matches!(
            head.forward(short, 2, &mut rng),
            Err(Error::Shape(_))
        ));
        let wrong_dim = HeadInput::Shared(noise(2, 5));
        assert!(head.forward(wrong_dim, 2, &mut rng).is_err());
    }

    #[test]
    fn parallel_stage_feeds_head_per_position() {
        let device = Default::default();
        let parallel = LinearParallel::<B>::new(&device, 4, 6, 5);
        let head = UmdHead::<B>::new(&device, 5, 4);
        let hs = parallel.forward(HeadInput::Shared(noise(2, 6))).unwrap();
        assert_eq!(hs.len(), 4);
        assert!(hs.iter().all(|h| h.dims() == [2, 5]));

        let three = HeadInput::PerPosition(vec![noise(2, 6), noise(2, 6), noise(2, 6)]);
        assert!(matches!(parallel.forward(three), Err(Error::Shape(_))));

        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let out = head
            .forward(HeadInput::PerPosition(hs), 3, &mut rng)
            .unwrap();
        assert_eq!(out.samples.dim(), (2, 3, 4));
    }
}
