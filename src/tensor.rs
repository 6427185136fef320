//! Host ↔ burn tensor conversions.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use ndarray::Array2;

use crate::{Error, Result};

pub(crate) fn array2_to_tensor<B: Backend>(device: &B::Device, x: &Array2<f32>) -> Tensor<B, 2> {
    let (n, d) = x.dim();
    let data = TensorData::new(x.iter().copied().collect::<Vec<f32>>(), [n, d]);
    Tensor::from_data(data, device)
}

pub(crate) fn indices_to_tensor<B: Backend>(
    device: &B::Device,
    idx: Vec<i64>,
    shape: [usize; 2],
) -> Tensor<B, 2, Int> {
    Tensor::from_data(TensorData::new(idx, shape), device)
}

pub(crate) fn tensor_to_vec<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))
}

pub(crate) fn tensor_to_array2<B: Backend>(t: Tensor<B, 2>) -> Result<Array2<f32>> {
    let [n, d] = t.dims();
    let flat = tensor_to_vec(t)?;
    Array2::from_shape_vec((n, d), flat)
        .map_err(|_| Error::Shape("tensor data does not match dims"))
}

/// Scalar value of a one-element tensor.
pub(crate) fn tensor_scalar<B: Backend>(t: Tensor<B, 1>) -> Result<f32> {
    tensor_to_vec(t)?
        .first()
        .copied()
        .ok_or(Error::Shape("expected a one-element tensor"))
}
