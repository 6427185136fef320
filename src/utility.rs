//! Fitness → utility standardization.
//!
//! The REINFORCE weight for a sample is its fitness standardized against the other samples
//! drawn from the same noise vector:
//!
//! \[
//! u_i = \frac{f_i - \bar f}{s + \varepsilon},
//! \]
//!
//! where \(s\) is the unbiased sample standard deviation and \(\varepsilon = 10^{-5}\).
//! Standardization runs along the **last axis only**; leading axes are independent groups.

use crate::{Error, Result};
use ndarray::{Array, ArrayView, ArrayViewMut1, Axis, Dimension};

/// Floor added to the standard deviation so constant groups map to zero instead of NaN.
pub const UTILITY_EPS: f64 = 1e-5;

/// Standardize `x` along its last axis.
///
/// Groups with fewer than two values have no spread estimate; their standard deviation is
/// taken as 0, so they map to zeros.
pub fn standardized_utility<D: Dimension>(x: &ArrayView<f64, D>) -> Result<Array<f64, D>> {
    if x.ndim() == 0 {
        return Err(Error::Shape("utility input must have at least one axis"));
    }
    let axis = Axis(x.ndim() - 1);
    let mut out = x.to_owned();
    for lane in out.lanes_mut(axis) {
        standardize_lane(lane);
    }
    Ok(out)
}

/// Flat-slice convenience wrapper around [`standardized_utility`].
pub fn standardized_utility_slice(x: &[f64]) -> Vec<f64> {
    let mut out = x.to_vec();
    standardize_lane(ArrayViewMut1::from(out.as_mut_slice()));
    out
}

fn standardize_lane(mut lane: ArrayViewMut1<f64>) {
    let k = lane.len();
    if k == 0 {
        return;
    }
    let mean = lane.iter().sum::<f64>() / k as f64;
    let std = if k < 2 {
        0.0
    } else {
        let ss: f64 = lane.iter().map(|&v| (v - mean) * (v - mean)).sum();
        (ss / (k - 1) as f64).sqrt()
    };
    let denom = std + UTILITY_EPS;
    lane.mapv_inplace(|v| (v - mean) / denom);
}
