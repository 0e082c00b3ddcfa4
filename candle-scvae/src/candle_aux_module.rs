#![allow(dead_code)]

use candle_core::{DType, Device, Result, Shape, Tensor};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;

/// One-hot encode an integer index tensor.
///
/// * `index_n` - index tensor of shape `[n]` or `[n, 1]`, values in `[0, k)`
/// * `k` - number of categories
///
/// # Returns `[n, k]` indicator matrix
pub fn one_hot_nk(index_n: &Tensor, k: usize) -> Result<Tensor> {
    let index_n = index_n.flatten_all()?.to_dtype(DType::U32)?;
    let eye_kk = Tensor::eye(k, DType::F32, index_n.device())?;
    eye_kk.index_select(&index_n, 0)
}

/// Draw a standard normal tensor from an explicit random source, so
/// that sampling is reproducible under seed injection.
///
/// * `shape` - output shape
/// * `device` - target device
/// * `rng` - random source
pub fn randn_tensor<S: Into<Shape>>(
    shape: S,
    device: &Device,
    rng: &mut dyn RngCore,
) -> Result<Tensor> {
    let shape: Shape = shape.into();
    let data: Vec<f32> = (0..shape.elem_count())
        .map(|_| rng.sample(StandardNormal))
        .collect();
    Tensor::from_vec(data, shape, device)
}

/// Numerically stable softplus: `log(1 + exp(x)) = relu(x) + log1p(exp(-|x|))`
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    x.relu()? + (x.abs()?.neg()?.exp()? + 1.)?.log()?
}

/// Numerically stable log-sigmoid: `log σ(x) = -softplus(-x)`
pub fn log_sigmoid(x: &Tensor) -> Result<Tensor> {
    softplus(&x.neg()?)?.neg()
}
