use candle_core::Tensor;
use log::debug;

use super::block_cholesky::{factorize, BlockCholesky, BlockCholeskyConfig};
use super::blocks::{assemble, AssembledBlocks, PrecisionBlocks};
use super::error::{check_dims, Result};
use super::log_det::{gaussian_entropy, log_determinant, LN_2PI};
use super::sampler::{sample, sample_n, NoiseSource};
use super::triangular::{multiply_transpose, posterior_mean};
use crate::dynamics::DynamicsParams;
use crate::encoder::StateEncoder;

#[derive(Debug, Clone)]
pub struct SmoothingConfig {
    pub cholesky: BlockCholeskyConfig,
    /// Weight `p` of the innovation noise penalty in the regularized
    /// entropy; `None` leaves the entropy unpenalized
    pub noise_penalty: Option<f64>,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            cholesky: BlockCholeskyConfig::default(),
            noise_penalty: None,
        }
    }
}

/// Gaussian smoothing posterior q(x(0..T) | y(0..T)) with
/// block-tridiagonal precision M
///
/// Built once per forward pass: the blocks are assembled and
/// factorized on construction, and mean, samples, entropy and
/// densities all share the one factor.
pub struct SmoothingPosterior {
    blocks: AssembledBlocks,
    factor: BlockCholesky,
    mean: Tensor,
    log_det: Tensor,
    penalty: Option<Tensor>,
}

impl SmoothingPosterior {
    /// Assemble, factorize and solve for the mean
    ///
    /// # Arguments
    /// * `precision` - encoder contributions
    /// * `dynamics` - dynamics prior
    /// * `config` - pivot tolerance and noise penalty
    pub fn new(
        precision: &PrecisionBlocks,
        dynamics: &DynamicsParams,
        config: &SmoothingConfig,
    ) -> Result<Self> {
        let blocks = assemble(precision, dynamics)?;
        let factor = factorize(&blocks.diag, blocks.off_diag.as_ref(), &config.cholesky)?;
        let mean = posterior_mean(&factor, &blocks.weighted_mean)?;
        let log_det = log_determinant(&factor)?;

        let penalty = match config.noise_penalty {
            Some(p) => Some(dynamics.noise_penalty(p)?),
            None => None,
        };

        debug!(
            "smoothing posterior over {} trial(s), T = {}, n = {}",
            blocks.batch_size(),
            blocks.trial_len(),
            blocks.dim()
        );

        Ok(Self {
            blocks,
            factor,
            mean,
            log_det,
            penalty,
        })
    }

    /// Encode observations and build the posterior
    ///
    /// # Arguments
    /// * `encoder` - recognition model
    /// * `y` - observations: shape (B, T, d)
    /// * `dynamics` - dynamics prior
    /// * `config` - pivot tolerance and noise penalty
    pub fn from_encoder<E: StateEncoder + ?Sized>(
        encoder: &E,
        y: &Tensor,
        dynamics: &DynamicsParams,
        config: &SmoothingConfig,
    ) -> Result<Self> {
        let precision = encoder.encode(y)?.precision_blocks()?;
        Self::new(&precision, dynamics, config)
    }

    pub fn blocks(&self) -> &AssembledBlocks {
        &self.blocks
    }

    pub fn factor(&self) -> &BlockCholesky {
        &self.factor
    }

    /// Posterior mean: shape (B, T, n)
    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// log|M|: shape (B,)
    pub fn log_determinant(&self) -> &Tensor {
        &self.log_det
    }

    pub fn batch_size(&self) -> usize {
        self.factor.batch_size()
    }

    pub fn trial_len(&self) -> usize {
        self.factor.trial_len()
    }

    pub fn dim(&self) -> usize {
        self.factor.dim()
    }

    /// One draw: shape (B, T, n)
    pub fn sample<N: NoiseSource + ?Sized>(&self, rng: &mut N) -> Result<Tensor> {
        sample(&self.factor, &self.mean, rng)
    }

    /// `num_samples` draws: shape (S, B, T, n)
    pub fn sample_n<N: NoiseSource + ?Sized>(&self, num_samples: usize, rng: &mut N) -> Result<Tensor> {
        sample_n(&self.factor, &self.mean, num_samples, rng)
    }

    /// Entropy of each trial's trajectory: shape (B,)
    pub fn entropy(&self) -> Result<Tensor> {
        gaussian_entropy(&self.log_det, self.trial_len() * self.dim())
    }

    /// Entropy per time step, plus the innovation noise penalty when
    /// one is configured
    ///
    /// (H + p * [sum log diag Q⁻¹ + sum log diag Q0⁻¹]) / T
    ///
    /// # Returns
    /// Shape (B,)
    pub fn regularized_entropy(&self) -> Result<Tensor> {
        let entropy = self.entropy()?;
        let entropy = match &self.penalty {
            Some(penalty) => entropy.broadcast_add(penalty)?,
            None => entropy,
        };
        Ok((entropy / self.trial_len() as f64)?)
    }

    /// Log-density of trajectories under the posterior
    ///
    /// log q(x) = 0.5 log|M| - 0.5 T n ln 2π - 0.5 |Lᵗ (x - mean)|²
    ///
    /// # Arguments
    /// * `x` - trajectories: shape (B, T, n)
    ///
    /// # Returns
    /// Shape (B,)
    pub fn log_density(&self, x: &Tensor) -> Result<Tensor> {
        check_dims(
            "trajectory",
            &[self.batch_size(), self.trial_len(), self.dim()],
            x.dims(),
        )?;
        let resid = x.sub(&self.mean)?;
        let z = multiply_transpose(&self.factor, &resid)?;
        let maha = z.sqr()?.sum(2)?.sum(1)?;

        let konst = -0.5 * (self.trial_len() * self.dim()) as f64 * LN_2PI;
        Ok(((&self.log_det * 0.5)? - (maha * 0.5)?)?.affine(1.0, konst)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::FixedNoiseEncoder;
    use crate::posterior::RngNoise;
    use candle_core::{DType, Device};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn unit_dynamics(n: usize) -> Result<DynamicsParams> {
        let eye = Tensor::eye(n, DType::F64, &Device::Cpu)?;
        DynamicsParams::new((&eye * 0.9)?, eye.clone(), eye)
    }

    #[test]
    fn test_log_density_at_mean() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::randn(0f64, 1f64, (2, 5, 3), &dev)?;
        let enc = FixedNoiseEncoder::new(3, 0.3)?;
        let post =
            SmoothingPosterior::from_encoder(&enc, &y, &unit_dynamics(3)?, &SmoothingConfig::default())?;

        let at_mean: Vec<f64> = post.log_density(post.mean())?.to_vec1()?;
        let log_det: Vec<f64> = post.log_determinant().to_vec1()?;
        for (lp, ld) in at_mean.iter().zip(log_det.iter()) {
            let expected = 0.5 * ld - 0.5 * 15.0 * LN_2PI;
            assert!((lp - expected).abs() < 1e-9);
        }

        let mut rng = RngNoise(StdRng::seed_from_u64(1));
        let x = post.sample(&mut rng)?;
        let away: Vec<f64> = post.log_density(&x)?.to_vec1()?;
        assert!(away[0] < at_mean[0]);
        Ok(())
    }

    #[test]
    fn test_regularized_entropy() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::zeros((1, 4, 2), DType::F64, &dev)?;
        let enc = FixedNoiseEncoder::new(2, 1.0)?;

        // Q⁻¹ = 4 I, Q0⁻¹ = I
        let eye = Tensor::eye(2, DType::F64, &dev)?;
        let dynamics = DynamicsParams::new((&eye * 0.5)?, (&eye * 2.0)?, eye)?;

        let config = SmoothingConfig {
            noise_penalty: Some(0.1),
            ..SmoothingConfig::default()
        };
        let post = SmoothingPosterior::from_encoder(&enc, &y, &dynamics, &config)?;

        let h: f64 = post.entropy()?.get(0)?.to_scalar()?;
        let reg: f64 = post.regularized_entropy()?.get(0)?.to_scalar()?;
        let penalty = 0.1 * 2.0 * 4f64.ln();
        assert!((reg - (h + penalty) / 4.0).abs() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_log_density_shape_check() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::zeros((1, 3, 2), DType::F64, &dev)?;
        let enc = FixedNoiseEncoder::new(2, 1.0)?;
        let post =
            SmoothingPosterior::from_encoder(&enc, &y, &unit_dynamics(2)?, &SmoothingConfig::default())?;
        let x = Tensor::zeros((1, 4, 2), DType::F64, &dev)?;
        assert!(post.log_density(&x).is_err());
        Ok(())
    }
}
