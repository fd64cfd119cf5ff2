use candle_core::{Module, Tensor, D};
use candle_nn::{Activation, Linear, VarBuilder};

use crate::posterior::{check_dims, check_nonzero, PosteriorError, PrecisionBlocks, Result};

/// Per-timestep recognition output, in square-root form
///
/// Λ_t = R_t R_tᵗ and Λˣ_t = S_t S_tᵗ are positive semidefinite by
/// construction. The cross term is R_t S_tᵗ.
#[derive(Clone, Debug)]
pub struct EncoderOutput {
    /// μ_t: shape (B, T, n)
    pub mu: Tensor,
    /// R_t: shape (B, T, n, n)
    pub lambda_chol: Tensor,
    /// S_t: shape (B, T-1, n, n); `None` means no cross-timestep term
    pub lambda_x_chol: Option<Tensor>,
}

impl EncoderOutput {
    /// Expand the square roots into precision contributions
    ///
    /// * Λ_t = R_t R_tᵗ
    /// * Λˣ_t = S_t S_tᵗ
    /// * cross_t = R_t S_tᵗ, t = 0..T-2
    /// * weighted mean Λ_t μ_t
    ///
    /// A missing `lambda_x_chol` with `T > 1` contributes zero blocks.
    pub fn precision_blocks(&self) -> Result<PrecisionBlocks> {
        let (nb, tt, n) = self.mu.dims3()?;
        check_nonzero("trial length", tt)?;
        check_dims("lambda_chol", &[nb, tt, n, n], self.lambda_chol.dims())?;

        let r = self.lambda_chol.contiguous()?;
        let lambda = r.matmul(&r.t()?.contiguous()?)?;
        let weighted_mean = lambda
            .matmul(&self.mu.unsqueeze(D::Minus1)?.contiguous()?)?
            .squeeze(D::Minus1)?;

        if tt == 1 {
            return Ok(PrecisionBlocks {
                lambda,
                lambda_x: None,
                cross: None,
                weighted_mean,
            });
        }

        let s = match &self.lambda_x_chol {
            Some(s) => {
                check_dims("lambda_x_chol", &[nb, tt - 1, n, n], s.dims())?;
                s.contiguous()?
            }
            None => Tensor::zeros((nb, tt - 1, n, n), r.dtype(), r.device())?,
        };
        let s_t = s.t()?.contiguous()?;
        let lambda_x = s.matmul(&s_t)?;
        let cross = r.narrow(1, 0, tt - 1)?.contiguous()?.matmul(&s_t)?;

        Ok(PrecisionBlocks {
            lambda,
            lambda_x: Some(lambda_x),
            cross: Some(cross),
            weighted_mean,
        })
    }
}

pub trait StateEncoder {
    /// Map observed trials to per-timestep recognition terms
    ///
    /// # Arguments
    /// * `y` - observations: shape (B, T, d)
    ///
    /// # Returns
    /// `EncoderOutput` with latent dimension `n = dim_latent()`
    fn encode(&self, y: &Tensor) -> Result<EncoderOutput>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

/// Observations are the latent states plus isotropic noise,
/// y(t) = x(t) + e(t), e(t) ~ N(0, σ² I)
///
/// With this encoder the smoothing posterior matches the Kalman
/// smoother of the linear-Gaussian model when AᵗQ⁻¹ is symmetric.
/// For general A the coupling block at (t+1, t) is −AᵗQ⁻¹, the
/// transpose of the LDS prior's −Q⁻¹A.
#[derive(Clone, Debug)]
pub struct FixedNoiseEncoder {
    dim: usize,
    noise_std: f64,
}

impl FixedNoiseEncoder {
    pub fn new(dim: usize, noise_std: f64) -> Result<Self> {
        check_nonzero("latent dimension", dim)?;
        if !(noise_std.is_finite() && noise_std > 0.0) {
            return Err(PosteriorError::InvalidParameter {
                what: "observation noise std",
                value: noise_std,
            });
        }
        Ok(Self { dim, noise_std })
    }
}

impl StateEncoder for FixedNoiseEncoder {
    fn encode(&self, y: &Tensor) -> Result<EncoderOutput> {
        let (nb, tt, d) = y.dims3()?;
        check_dims("observations", &[nb, tt, self.dim], &[nb, tt, d])?;

        let root = (Tensor::eye(d, y.dtype(), y.device())? / self.noise_std)?;
        let lambda_chol = root
            .reshape((1, 1, d, d))?
            .broadcast_as((nb, tt, d, d))?
            .contiguous()?;

        Ok(EncoderOutput {
            mu: y.clone(),
            lambda_chol,
            lambda_x_chol: None,
        })
    }

    fn dim_obs(&self) -> usize {
        self.dim
    }

    fn dim_latent(&self) -> usize {
        self.dim
    }
}

/// Fully connected ReLU layers followed by a linear head
struct DenseStack {
    hidden: Vec<Linear>,
    out: Linear,
}

impl DenseStack {
    fn new(in_dim: usize, layers: &[usize], out_dim: usize, vs: VarBuilder) -> Result<Self> {
        let mut hidden = Vec::with_capacity(layers.len());
        let mut prev_dim = in_dim;
        for (j, &next_dim) in layers.iter().enumerate() {
            hidden.push(candle_nn::linear(prev_dim, next_dim, vs.pp(format!("fc.{}", j)))?);
            prev_dim = next_dim;
        }
        let out = candle_nn::linear(prev_dim, out_dim, vs.pp("out"))?;
        Ok(Self { hidden, out })
    }
}

impl Module for DenseStack {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = x.clone();
        for layer in self.hidden.iter() {
            h = Activation::Relu.forward(&layer.forward(&h)?)?;
        }
        self.out.forward(&h)
    }
}

/// Recognition network with three heads
///
/// * `nn.mu` : y(t) -> μ(t)
/// * `nn.lambda` : y(t) -> R(t), flattened n x n
/// * `nn.lambda_x` : y(t+1) -> S(t), flattened n x n
pub struct MlpStateEncoder {
    n_obs: usize,
    n_latent: usize,
    mu: DenseStack,
    lambda_chol: DenseStack,
    lambda_x_chol: DenseStack,
}

impl MlpStateEncoder {
    /// Create a recognition network
    ///
    /// # Arguments
    /// * `n_obs` - observation dimension
    /// * `n_latent` - latent dimension
    /// * `layers` - hidden layer sizes, shared by all three heads
    /// * `vs` - variable builder
    pub fn new(n_obs: usize, n_latent: usize, layers: &[usize], vs: VarBuilder) -> Result<Self> {
        check_nonzero("observation dimension", n_obs)?;
        check_nonzero("latent dimension", n_latent)?;
        let nn2 = n_latent * n_latent;
        Ok(Self {
            n_obs,
            n_latent,
            mu: DenseStack::new(n_obs, layers, n_latent, vs.pp("nn.mu"))?,
            lambda_chol: DenseStack::new(n_obs, layers, nn2, vs.pp("nn.lambda"))?,
            lambda_x_chol: DenseStack::new(n_obs, layers, nn2, vs.pp("nn.lambda_x"))?,
        })
    }
}

impl StateEncoder for MlpStateEncoder {
    fn encode(&self, y: &Tensor) -> Result<EncoderOutput> {
        let (nb, tt, d) = y.dims3()?;
        check_nonzero("trial length", tt)?;
        check_dims("observations", &[nb, tt, self.n_obs], &[nb, tt, d])?;
        let n = self.n_latent;

        let mu = self.mu.forward(y)?;
        let lambda_chol = self.lambda_chol.forward(y)?.reshape((nb, tt, n, n))?;

        let lambda_x_chol = if tt > 1 {
            let y_next = y.narrow(1, 1, tt - 1)?.contiguous()?;
            Some(
                self.lambda_x_chol
                    .forward(&y_next)?
                    .reshape((nb, tt - 1, n, n))?,
            )
        } else {
            None
        };

        Ok(EncoderOutput {
            mu,
            lambda_chol,
            lambda_x_chol,
        })
    }

    fn dim_obs(&self) -> usize {
        self.n_obs
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_fixed_noise_blocks() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[[1f64, 2.], [3., 4.], [5., 6.]]], &dev)?;
        let enc = FixedNoiseEncoder::new(2, 0.5)?;
        let blocks = enc.encode(&y)?.precision_blocks()?;

        // Λ = I / 0.25 = 4 I
        let lambda: Vec<Vec<f64>> = blocks.lambda.get(0)?.get(1)?.to_vec2()?;
        assert!((lambda[0][0] - 4.0).abs() < 1e-12);
        assert!(lambda[0][1].abs() < 1e-12);

        let wm: Vec<Vec<f64>> = blocks.weighted_mean.get(0)?.to_vec2()?;
        assert!((wm[2][1] - 24.0).abs() < 1e-12);

        let cross = blocks.cross.as_ref().expect("cross blocks");
        assert_eq!(cross.dims(), &[1, 2, 2, 2]);
        assert_eq!(cross.abs()?.sum_all()?.to_scalar::<f64>()?, 0.0);
        Ok(())
    }

    #[test]
    fn test_mlp_encoder_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &dev);
        let enc = MlpStateEncoder::new(5, 3, &[8, 8], vb)?;
        assert_eq!(enc.dim_obs(), 5);
        assert_eq!(enc.dim_latent(), 3);

        let y = Tensor::randn(0f64, 1f64, (2, 4, 5), &dev)?;
        let out = enc.encode(&y)?;
        assert_eq!(out.mu.dims(), &[2, 4, 3]);
        assert_eq!(out.lambda_chol.dims(), &[2, 4, 3, 3]);
        assert_eq!(
            out.lambda_x_chol.as_ref().map(|s| s.dims().to_vec()),
            Some(vec![2, 3, 3, 3])
        );

        let blocks = out.precision_blocks()?;
        assert_eq!(blocks.cross.as_ref().map(|c| c.dims().to_vec()), Some(vec![2, 3, 3, 3]));
        assert_eq!(blocks.weighted_mean.dims(), &[2, 4, 3]);

        // 3 heads x (2 hidden + 1 output) x (weight, bias)
        assert_eq!(varmap.all_vars().len(), 18);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_noise_std() {
        for bad in [0.0, -0.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                FixedNoiseEncoder::new(2, bad),
                Err(PosteriorError::InvalidParameter { .. })
            ));
        }
        assert!(FixedNoiseEncoder::new(2, 1e-3).is_ok());
    }

    #[test]
    fn test_wrong_observation_dim() -> Result<()> {
        let y = Tensor::zeros((1, 3, 4), DType::F64, &Device::Cpu)?;
        let enc = FixedNoiseEncoder::new(2, 1.0)?;
        assert!(enc.encode(&y).is_err());
        Ok(())
    }
}
