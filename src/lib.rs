//! # nnco
//!
//! Neural estimation of probability distributions over permutations, trained with a
//! score-function (REINFORCE) gradient to optimize black-box combinatorial objectives.
//!
//! This crate is intentionally small:
//!
//! - it implements two **generative heads** over permutations (Plackett-Luce and a factorized
//!   "UMD" categorical head) together with exact log-probabilities,
//! - it implements the **training loop** that turns oracle fitness into a standardized utility and
//!   backpropagates `mean(log p ⊙ u)` through the log-probabilities only,
//! - it ships reference LOP / PFSP oracles so the loop is runnable end to end.
//!
//! ## Public invariants (must not change)
//!
//! - **Determinism knobs are explicit**: noise and sampling take a seeded RNG (or a config seed).
//! - **Log-probabilities match the sampler**: the log-probability of a sample is always computed
//!   from the same logits that were used to draw it, in the same factor order.
//! - **No hidden normalization**: the only normalization of fitness is [`utility::standardized_utility`].
//! - **Optimization direction is explicit**: see [`problem::Direction`].
//!
//! ## How this maps to the method
//!
//! A generator \(g_\theta\) maps noise \(z \sim \mathcal N(0, I)\) to the parameters of a
//! distribution \(P_\theta(x \mid z)\) over permutations. Each iteration draws `batch_size`
//! noise vectors, `num_samples` solutions per noise vector, and forms the estimate
//!
//! \[
//! d_t = \frac{1}{\tau\lambda} \sum_z \sum_x \nabla_\theta \log P_\theta(x \mid z)\, u(f(x)),
//! \]
//!
//! where \(u\) is the standardized utility.
//!
//! ## Module map
//!
//! - `utility`: fitness standardization
//! - `categorical`: plain-array softmax / sampling / Plackett-Luce log-probabilities
//! - `codec`: Marina vector ↔ permutation, permutation inverse
//! - `logits`: pluggable logit reshaping applied before the UMD categoricals
//! - `umd`: factorized categorical head + parallel linear stage
//! - `pl`: Plackett-Luce head
//! - `model`: assembly of pre-head layers and one head
//! - `problem`: oracle trait and reference LOP / PFSP instances
//! - `metrics`: convergence diagnostics (entropy, mode/antimode)
//! - `train`: REINFORCE loop and best-fitness tracking
//! - `report`: CSV run summary and per-iteration trace

pub mod categorical;
pub mod codec;
pub mod logits;
pub mod metrics;
pub mod model;
pub mod pl;
pub mod problem;
pub mod report;
mod tensor;
pub mod train;
pub mod umd;
pub mod utility;

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;

/// Default burn backend for training: ndarray + autodiff.
pub type BurnBackend = Autodiff<NdArray<f32>>;

/// nnco error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    #[error("domain error: {0}")]
    Domain(&'static str),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("numerical error: {0}")]
    Numerical(String),
    #[error("oracle failed to evaluate a solution: {0}")]
    Oracle(String),
    #[error("failed to parse instance: {0}")]
    Parse(String),
    #[error("tensor data error: {0}")]
    Tensor(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
