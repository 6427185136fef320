//! Generative model: noise → pre-head MLP → (optional parallel stage) → one head.
//!
//! The model owns every trainable parameter, so a single `GradientsParams::from_grads(.., &model)`
//! covers the whole pipeline.

use burn_core as burn;

use burn::module::{Ignored, Module};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn_nn::{Linear, LinearConfig, Relu};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::logits::LogitReshape;
use crate::pl::PlHead;
use crate::problem::ProblemKind;
use crate::umd::{HeadInput, LinearParallel, UmdHead};
use crate::{Error, Result};

/// Which distribution family the model parameterizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadKind {
    /// Plackett-Luce scores; samples are permutations.
    PlackettLuce,
    /// Factorized categoricals; samples are Marina vectors.
    Umd,
}

impl HeadKind {
    /// Head used for each problem family by the reference runs.
    pub fn for_problem(kind: ProblemKind) -> Self {
        match kind {
            ProblemKind::Lop => HeadKind::PlackettLuce,
            ProblemKind::Pfsp => HeadKind::Umd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub noise_dim: usize,
    pub hidden_dim: usize,
    /// Number of `Linear + ReLU` layers before the head.
    pub prehead_layers: usize,
    pub head: HeadKind,
    /// Insert a per-position `Linear + ReLU` stage before the UMD head.
    pub parallel_stage: bool,
    /// Solutions drawn per noise vector.
    pub num_samples: usize,
    /// Applied to UMD logits before the categoricals are built.
    pub logit_reshape: LogitReshape,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            noise_dim: 128,
            hidden_dim: 128,
            prehead_layers: 1,
            head: HeadKind::Umd,
            parallel_stage: false,
            num_samples: 64,
            logit_reshape: LogitReshape::Identity,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self, sample_length: usize) -> Result<()> {
        if sample_length == 0 {
            return Err(Error::Config("sample length must be >= 1".into()));
        }
        if self.noise_dim == 0 {
            return Err(Error::Config("noise_dim must be >= 1".into()));
        }
        if (self.prehead_layers > 0 || self.parallel_stage) && self.hidden_dim == 0 {
            return Err(Error::Config("hidden_dim must be >= 1".into()));
        }
        if self.num_samples == 0 {
            return Err(Error::Config("num_samples must be >= 1".into()));
        }
        if self.parallel_stage && self.head != HeadKind::Umd {
            return Err(Error::Config(
                "the parallel stage is only supported with the UMD head".into(),
            ));
        }
        if self.head == HeadKind::PlackettLuce && self.logit_reshape != LogitReshape::Identity {
            return Err(Error::Config(
                "logit reshaping applies to the UMD head only".into(),
            ));
        }
        if let LogitReshape::Temperature(t) = self.logit_reshape {
            if !(t.is_finite() && t > 0.0) {
                return Err(Error::Config(format!(
                    "temperature must be positive and finite, got {t}"
                )));
            }
        }
        Ok(())
    }

    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
        sample_length: usize,
    ) -> Result<GenerativeModel<B>> {
        self.validate(sample_length)?;

        let mut prehead = Vec::with_capacity(self.prehead_layers);
        let mut in_dim = self.noise_dim;
        for _ in 0..self.prehead_layers {
            prehead.push(LinearConfig::new(in_dim, self.hidden_dim).init(device));
            in_dim = self.hidden_dim;
        }

        let (parallel, pl, umd) = match self.head {
            HeadKind::PlackettLuce => {
                let pl = PlHead::new(device, in_dim, sample_length);
                (None, Some(pl), None)
            }
            HeadKind::Umd if self.parallel_stage => {
                let parallel = LinearParallel::new(device, sample_length, in_dim, self.hidden_dim);
                let umd = UmdHead::new(device, self.hidden_dim, sample_length);
                (Some(parallel), None, Some(umd))
            }
            HeadKind::Umd => (None, None, Some(UmdHead::new(device, in_dim, sample_length))),
        };

        Ok(GenerativeModel {
            prehead,
            parallel,
            pl,
            umd,
            noise_dim: self.noise_dim,
            num_samples: self.num_samples,
            logit_reshape: Ignored(self.logit_reshape),
        })
    }
}

/// Detached distribution parameters of one forward pass.
#[derive(Debug, Clone)]
pub enum Distributions {
    /// UMD: one `(batch, n - i)` logit matrix per position.
    PerPosition(Vec<Array2<f32>>),
    /// PL: `(batch, n)` scores.
    Scores(Array2<f32>),
}

/// Full forward output.
#[derive(Debug, Clone)]
pub struct Forward<B: Backend> {
    /// `(batch, num_samples, n)`: permutations (PL) or Marina vectors (UMD).
    pub samples: Array3<usize>,
    /// `[batch, num_samples]`, attached to the graph.
    pub log_probs: Tensor<B, 2>,
    pub distributions: Distributions,
    /// PL scores still attached to the graph; `None` for UMD.
    pub scores: Option<Tensor<B, 2>>,
}

#[derive(Module, Debug)]
pub struct GenerativeModel<B: Backend> {
    prehead: Vec<Linear<B>>,
    parallel: Option<LinearParallel<B>>,
    pl: Option<PlHead<B>>,
    umd: Option<UmdHead<B>>,
    noise_dim: usize,
    num_samples: usize,
    logit_reshape: Ignored<LogitReshape>,
}

impl<B: Backend> GenerativeModel<B> {
    pub fn head_kind(&self) -> HeadKind {
        if self.pl.is_some() {
            HeadKind::PlackettLuce
        } else {
            HeadKind::Umd
        }
    }

    pub fn noise_dim(&self) -> usize {
        self.noise_dim
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// `(samples, log_probs)` for noise `[batch, noise_dim]`.
    pub fn forward(
        &self,
        noise: Tensor<B, 2>,
        rng: &mut impl rand::Rng,
    ) -> Result<(Array3<usize>, Tensor<B, 2>)> {
        let out = self.forward_with_diagnostics(noise, rng)?;
        Ok((out.samples, out.log_probs))
    }

    pub fn forward_with_diagnostics(
        &self,
        noise: Tensor<B, 2>,
        rng: &mut impl rand::Rng,
    ) -> Result<Forward<B>> {
        let [batch, d] = noise.dims();
        if d != self.noise_dim || batch == 0 {
            return Err(Error::Shape("noise must be [batch >= 1, noise_dim]"));
        }

        let mut h = noise;
        for linear in &self.prehead {
            h = Relu.forward(linear.forward(h));
        }

        if let Some(pl) = &self.pl {
            let out = pl.forward(h, self.num_samples, rng)?;
            return Ok(Forward {
                samples: out.samples,
                log_probs: out.log_probs,
                distributions: Distributions::Scores(out.weights),
                scores: Some(out.scores),
            });
        }

        let umd = self
            .umd
            .as_ref()
            .ok_or_else(|| Error::Config("model has no head".into()))?;
        let input = match &self.parallel {
            Some(parallel) => HeadInput::PerPosition(parallel.forward(HeadInput::Shared(h))?),
            None => HeadInput::Shared(h),
        };
        let out = umd.forward_with(input, self.num_samples, &self.logit_reshape.0, rng)?;
        Ok(Forward {
            samples: out.samples,
            log_probs: out.log_probs,
            distributions: Distributions::PerPosition(out.logits),
            scores: None,
        })
    }
}
