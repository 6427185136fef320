//! Logit reshaping applied before a categorical distribution is built.
//!
//! This is an experiment seam: alternative score → probability mappings can be tried without
//! touching the sampling or log-probability machinery, because both read the **transformed**
//! logits.

use burn_core as burn;

use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// A mapping from raw logits `[batch, k]` to the logits that parameterize the categorical.
pub trait LogitTransform {
    fn transform<B: Backend>(&self, logits: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// No-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl LogitTransform for Identity {
    fn transform<B: Backend>(&self, logits: Tensor<B, 2>) -> Tensor<B, 2> {
        logits
    }
}

/// Replace logits by normalized log-probabilities (`log_softmax` along the choice axis).
///
/// The induced distribution is unchanged; what changes is the scale of the reported logits
/// and the gradient path through the normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNormalization;

impl LogitTransform for LogNormalization {
    fn transform<B: Backend>(&self, logits: Tensor<B, 2>) -> Tensor<B, 2> {
        log_softmax(logits, 1)
    }
}

/// Divide logits by a positive temperature.
#[derive(Debug, Clone, Copy)]
pub struct Temperature(pub f32);

impl LogitTransform for Temperature {
    fn transform<B: Backend>(&self, logits: Tensor<B, 2>) -> Tensor<B, 2> {
        logits.div_scalar(self.0)
    }
}

/// Configurable choice of [`LogitTransform`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum LogitReshape {
    #[default]
    Identity,
    LogNormalization,
    Temperature(f32),
}

impl LogitTransform for LogitReshape {
    fn transform<B: Backend>(&self, logits: Tensor<B, 2>) -> Tensor<B, 2> {
        match *self {
            LogitReshape::Identity => Identity.transform(logits),
            LogitReshape::LogNormalization => LogNormalization.transform(logits),
            LogitReshape::Temperature(t) => Temperature(t).transform(logits),
        }
    }
}
