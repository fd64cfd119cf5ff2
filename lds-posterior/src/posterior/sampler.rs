use candle_core::{DType, Device, Tensor};
use rand::Rng;
use rand_distr::StandardNormal;

use super::block_cholesky::BlockCholesky;
use super::error::{check_dims, check_nonzero, Result};
use super::triangular::backward_solve;

/// Source of i.i.d. standard normal draws
pub trait NoiseSource {
    /// Draw a tensor of N(0, 1) values
    ///
    /// # Arguments
    /// * `shape` - output shape
    /// * `dtype` - output dtype
    /// * `dev` - output device
    fn standard_normal(&mut self, shape: &[usize], dtype: DType, dev: &Device) -> Result<Tensor>;
}

/// Standard normal draws from any `rand` generator; seed a
/// `StdRng` for reproducible samples.
pub struct RngNoise<R: Rng>(pub R);

impl<R: Rng> NoiseSource for RngNoise<R> {
    fn standard_normal(&mut self, shape: &[usize], dtype: DType, dev: &Device) -> Result<Tensor> {
        let numel = shape.iter().product::<usize>();
        let values: Vec<f64> = (0..numel)
            .map(|_| self.0.sample::<f64, _>(StandardNormal))
            .collect();
        Ok(Tensor::from_vec(values, shape, &Device::Cpu)?
            .to_dtype(dtype)?
            .to_device(dev)?)
    }
}

/// Standard normal draws from the tensor device's own generator
pub struct DeviceNoise;

impl NoiseSource for DeviceNoise {
    fn standard_normal(&mut self, shape: &[usize], dtype: DType, dev: &Device) -> Result<Tensor> {
        // f32 first: not every device generates f64
        Ok(Tensor::randn(0f32, 1f32, shape, dev)?.to_dtype(dtype)?)
    }
}

/// Draw one reparameterized posterior sample
///
/// x = mean + L⁻ᵗ z, z ~ N(0, I)
///
/// so that Cov[x] = L⁻ᵗ L⁻¹ = (L Lᵗ)⁻¹ = M⁻¹. The sample is a
/// differentiable function of the factor (hence of the assembled
/// blocks) and the mean.
///
/// # Arguments
/// * `factor` - block Cholesky factor of M
/// * `mean` - posterior mean: shape (B, T, n)
/// * `rng` - noise source
///
/// # Returns
/// Sample: shape (B, T, n)
pub fn sample<N: NoiseSource + ?Sized>(
    factor: &BlockCholesky,
    mean: &Tensor,
    rng: &mut N,
) -> Result<Tensor> {
    let shape = [factor.batch_size(), factor.trial_len(), factor.dim()];
    check_dims("posterior mean", &shape, mean.dims())?;

    let z = rng.standard_normal(&shape, mean.dtype(), mean.device())?;
    Ok((backward_solve(factor, &z)? + mean)?)
}

/// Draw `num_samples` independent posterior samples
///
/// # Returns
/// Samples: shape (S, B, T, n)
pub fn sample_n<N: NoiseSource + ?Sized>(
    factor: &BlockCholesky,
    mean: &Tensor,
    num_samples: usize,
    rng: &mut N,
) -> Result<Tensor> {
    check_nonzero("number of samples", num_samples)?;
    let draws = (0..num_samples)
        .map(|_| sample(factor, mean, &mut *rng))
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::stack(&draws, 0)?)
}
