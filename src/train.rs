//! REINFORCE training loop.
//!
//! One iteration:
//!
//! 1. draw `batch_size` noise vectors \(z \sim \mathcal N(0, I)\),
//! 2. draw `num_samples` solutions per noise vector from the model (log-probabilities stay in
//!    the autodiff graph),
//! 3. decode the samples into permutations and evaluate them with the oracle (in parallel),
//! 4. standardize fitness per noise vector,
//! 5. minimize `sign · mean(log p ⊙ u)` with Adam, where the sign comes from [`Direction`].
//!
//! Only the log-probabilities carry gradient; fitness and utility are plain host arrays.

use std::time::{Duration, Instant};

use burn_core as burn;

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use burn_optim::{AdamConfig, GradientsParams, Optimizer};
use ndarray::{Array2, Array3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec::{inverse_permutation_batch, marina_to_permutation_batch};
use crate::metrics::{diagnose, Diagnostics};
use crate::model::{Distributions, Forward, GenerativeModel, HeadKind, ModelConfig};
use crate::pl::{mode_and_antimode, plackett_luce_log_prob};
use crate::problem::{Direction, Problem};
use crate::tensor::{array2_to_tensor, tensor_scalar};
use crate::utility::standardized_utility;
use crate::{BurnBackend, Error, Result};

/// Evaluation budget used when none is configured: `1000 · n²`.
pub fn default_max_evaluations(n: usize) -> usize {
    1000 * n * n
}

/// `floor(max_evaluations / (batch_size · num_samples))`.
pub fn budget_iterations(max_evaluations: usize, batch_size: usize, num_samples: usize) -> usize {
    max_evaluations / (batch_size * num_samples).max(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Noise vectors per iteration.
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Overrides `1000 · n²`.
    pub max_evaluations: Option<usize>,
    /// Overrides the iteration count derived from the evaluation budget.
    pub iterations: Option<usize>,
    /// Seeds noise and sampling.
    pub seed: u64,
    /// Compute convergence diagnostics every iteration.
    pub trace: bool,
    /// Weight of `mean(log P(mode))` added to the loss (PL only; 0 disables it).
    pub mode_penalty: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            learning_rate: 0.003,
            max_evaluations: None,
            iterations: None,
            seed: 0,
            trace: false,
            mode_penalty: 0.0,
        }
    }
}

impl TrainConfig {
    /// `(max_evaluations, iterations)` for a problem of size `n`.
    pub fn budget(&self, n: usize, num_samples: usize) -> (usize, usize) {
        let max_evaluations = self
            .max_evaluations
            .unwrap_or_else(|| default_max_evaluations(n));
        let iterations = self
            .iterations
            .unwrap_or_else(|| budget_iterations(max_evaluations, self.batch_size, num_samples));
        (max_evaluations, iterations)
    }
}

/// How model samples become permutations before they reach the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decoding {
    /// Samples already are permutations.
    Identity,
    /// Marina vector → permutation → inverse permutation.
    MarinaInverse,
}

impl Decoding {
    /// Decoding follows the head, not the problem. Both decodings are bijections onto
    /// permutations, so any head can search any problem: a UMD head on LOP is valid and the
    /// oracle sees the inverse of the decoded Marina permutation.
    pub fn for_head(head: HeadKind) -> Self {
        match head {
            HeadKind::PlackettLuce => Decoding::Identity,
            HeadKind::Umd => Decoding::MarinaInverse,
        }
    }

    /// Decode `(batch, k, n)` samples into `(batch · k, n)` permutations, batch-major.
    pub fn decode(self, samples: &Array3<usize>) -> Result<Array2<usize>> {
        let (batch, k, n) = samples.dim();
        let flat = samples
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((batch * k, n))
            .map_err(|_| Error::Shape("samples must be (batch, k, n)"))?;
        match self {
            Decoding::Identity => Ok(flat),
            Decoding::MarinaInverse => {
                let perms = marina_to_permutation_batch(&flat.view())?;
                inverse_permutation_batch(&perms.view())
            }
        }
    }
}

/// Evaluate every row of `perms` with the oracle. Any oracle error aborts the batch.
pub fn evaluate_batch<P: Problem + Sync>(problem: &P, perms: &Array2<usize>) -> Result<Vec<f64>> {
    (0..perms.nrows())
        .into_par_iter()
        .map(|r| problem.evaluate(&perms.row(r).to_vec()))
        .collect()
}

/// `sign(direction) · mean(log_probs ⊙ utility)`.
///
/// `utility` is treated as a constant.
pub fn reinforce_loss<B: Backend>(
    log_probs: Tensor<B, 2>,
    utility: &Array2<f64>,
    direction: Direction,
) -> Result<Tensor<B, 1>> {
    let [batch, k] = log_probs.dims();
    if utility.dim() != (batch, k) {
        return Err(Error::Shape("utility must match log_probs [batch, num_samples]"));
    }
    let u: Vec<f32> = utility.iter().map(|&x| x as f32).collect();
    let u = Tensor::<B, 2>::from_data(TensorData::new(u, [batch, k]), &log_probs.device());
    Ok((log_probs * u).mean().mul_scalar(direction.loss_sign()))
}

/// Best fitness seen so far, one entry per iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct BestTrace {
    direction: Direction,
    values: Vec<f64>,
}

impl BestTrace {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            values: Vec::new(),
        }
    }

    /// Fold one iteration's fitness values into the trace.
    ///
    /// Returns the index within `fitness` of a new best, if this iteration improved on it.
    pub fn push_batch(&mut self, fitness: &[f64]) -> Option<usize> {
        let mut incumbent = self.best();
        let mut improved = None;
        for (i, &f) in fitness.iter().enumerate() {
            let better = match incumbent {
                None => !f.is_nan(),
                Some(b) => self.direction.improves(f, b),
            };
            if better {
                incumbent = Some(f);
                improved = Some(i);
            }
        }
        if let Some(b) = incumbent {
            self.values.push(b);
        }
        improved
    }

    pub fn best(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What happened in one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub loss: f64,
    /// Present when [`TrainConfig::trace`] is set.
    pub diagnostics: Option<Diagnostics>,
}

/// A finished run.
#[derive(Debug)]
pub struct TrainedRun {
    pub model: GenerativeModel<BurnBackend>,
    pub best: BestTrace,
    /// The permutation that achieved the best fitness.
    pub best_solution: Vec<usize>,
    pub history: Vec<IterationRecord>,
    pub max_evaluations: usize,
    pub iterations: usize,
    pub elapsed: Duration,
}

fn noise_tensor(
    device: &<BurnBackend as Backend>::Device,
    rng: &mut ChaCha8Rng,
    batch: usize,
    dim: usize,
) -> Tensor<BurnBackend, 2> {
    let z = Array2::<f32>::from_shape_simple_fn((batch, dim), || {
        StandardNormal.sample(&mut *rng)
    });
    array2_to_tensor(device, &z)
}

fn mode_log_prob_mean(out: &Forward<BurnBackend>) -> Result<Option<Tensor<BurnBackend, 1>>> {
    let (Some(scores), Distributions::Scores(weights)) = (&out.scores, &out.distributions) else {
        return Ok(None);
    };
    let batch = weights.nrows();
    let lp = plackett_luce_log_prob(scores.clone(), &mode_and_antimode(weights))?;
    Ok(Some(lp.slice([0..batch, 0..1]).mean()))
}

/// Train a freshly initialized model against `problem`.
pub fn train<P: Problem + Sync>(
    device: &<BurnBackend as Backend>::Device,
    problem: &P,
    model_cfg: &ModelConfig,
    train_cfg: &TrainConfig,
) -> Result<TrainedRun> {
    let n = problem.size();
    if train_cfg.batch_size == 0 {
        return Err(Error::Config("batch_size must be >= 1".into()));
    }
    if !(train_cfg.learning_rate.is_finite() && train_cfg.learning_rate > 0.0) {
        return Err(Error::Config("learning_rate must be positive".into()));
    }
    if train_cfg.mode_penalty != 0.0 && model_cfg.head != HeadKind::PlackettLuce {
        return Err(Error::Config("mode_penalty requires the Plackett-Luce head".into()));
    }
    let (max_evaluations, iterations) = train_cfg.budget(n, model_cfg.num_samples);
    if iterations == 0 {
        return Err(Error::Config(format!(
            "budget of {max_evaluations} evaluations is below one iteration ({} x {})",
            train_cfg.batch_size, model_cfg.num_samples
        )));
    }

    let mut model = model_cfg.init::<BurnBackend>(device, n)?;
    let mut optim = AdamConfig::new().init::<BurnBackend, GenerativeModel<BurnBackend>>();
    let mut rng = ChaCha8Rng::seed_from_u64(train_cfg.seed);
    let decoding = Decoding::for_head(model_cfg.head);
    let direction = problem.direction();
    let batch = train_cfg.batch_size;
    let k = model_cfg.num_samples;

    info!(
        n,
        iterations,
        max_evaluations,
        batch,
        num_samples = k,
        params = model.num_params(),
        "training started"
    );

    let mut best = BestTrace::new(direction);
    let mut best_solution = Vec::new();
    let mut history = Vec::with_capacity(iterations);
    let start = Instant::now();

    for iteration in 0..iterations {
        let z = noise_tensor(device, &mut rng, batch, model_cfg.noise_dim);
        let out = model.forward_with_diagnostics(z, &mut rng)?;

        let perms = decoding.decode(&out.samples)?;
        let fitness = evaluate_batch(problem, &perms)?;
        let fitness = Array2::from_shape_vec((batch, k), fitness)
            .map_err(|_| Error::Shape("fitness must be (batch, num_samples)"))?;
        let utility = standardized_utility(&fitness.view())?;

        let diagnostics = if train_cfg.trace {
            Some(diagnose(&out.distributions)?)
        } else {
            None
        };

        let mut loss = reinforce_loss(out.log_probs.clone(), &utility, direction)?;
        if train_cfg.mode_penalty != 0.0 {
            if let Some(mode_lp) = mode_log_prob_mean(&out)? {
                loss = loss + mode_lp.mul_scalar(train_cfg.mode_penalty);
            }
        }

        let loss_value = f64::from(tensor_scalar(loss.clone())?);
        if !loss_value.is_finite() {
            return Err(Error::Numerical(format!(
                "loss is {loss_value} at iteration {iteration}"
            )));
        }

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(train_cfg.learning_rate, model, grads);

        let flat = fitness.as_slice().unwrap_or(&[]);
        if let Some(i) = best.push_batch(flat) {
            best_solution = perms.row(i).to_vec();
        }
        let best_fitness = best.best().unwrap_or(f64::NAN);
        let mean_fitness = fitness.mean().unwrap_or(f64::NAN);

        debug!(
            iteration,
            best_fitness,
            mean_fitness,
            loss = loss_value,
            "iteration finished"
        );
        history.push(IterationRecord {
            iteration,
            best_fitness,
            mean_fitness,
            loss: loss_value,
            diagnostics,
        });
    }

    let elapsed = start.elapsed();
    info!(
        best = best.best().unwrap_or(f64::NAN),
        elapsed_secs = elapsed.as_secs_f64(),
        "training finished"
    );

    Ok(TrainedRun {
        model,
        best,
        best_solution,
        history,
        max_evaluations,
        iterations,
        elapsed,
    })
}
