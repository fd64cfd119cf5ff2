use candle_core::{DType, Device, Tensor};
use log::debug;

use super::error::{check_dims, check_nonzero, PosteriorError, Result};
use crate::dynamics::DynamicsParams;

/// Per-timestep encoder contributions to the posterior precision of
/// a `T`-step latent trajectory, batched over `B` trials.
#[derive(Clone, Debug)]
pub struct PrecisionBlocks {
    /// Λ_t: shape (B, T, n, n)
    pub lambda: Tensor,
    /// Λˣ_t, cross-timestep precision: shape (B, T-1, n, n), `None` iff T = 1
    pub lambda_x: Option<Tensor>,
    /// Cross term coupling t and t+1: shape (B, T-1, n, n), `None` iff T = 1
    pub cross: Option<Tensor>,
    /// Λ_t μ_t: shape (B, T, n)
    pub weighted_mean: Tensor,
}

/// Blocks of the symmetric block-tridiagonal posterior precision M
#[derive(Clone, Debug)]
pub struct AssembledBlocks {
    /// Diagonal blocks A_t: shape (B, T, n, n)
    pub diag: Tensor,
    /// Sub-diagonal blocks B_t at position (t+1, t): shape (B, T-1, n, n)
    pub off_diag: Option<Tensor>,
    /// Precision-weighted means: shape (B, T, n)
    pub weighted_mean: Tensor,
}

impl AssembledBlocks {
    pub fn batch_size(&self) -> usize {
        self.diag.dims()[0]
    }

    pub fn trial_len(&self) -> usize {
        self.diag.dims()[1]
    }

    pub fn dim(&self) -> usize {
        self.diag.dims()[2]
    }
}

/// `(B, T, n, n)` or a rank error
pub(crate) fn block_dims(what: &'static str, x: &Tensor) -> Result<(usize, usize, usize)> {
    match *x.dims() {
        [nb, tt, n, m] if n == m => Ok((nb, tt, n)),
        [nb, tt, n, _] => Err(PosteriorError::ShapeMismatch {
            what,
            expected: vec![nb, tt, n, n],
            got: x.dims().to_vec(),
        }),
        _ => Err(PosteriorError::ShapeMismatch {
            what,
            expected: vec![0; 4],
            got: x.dims().to_vec(),
        }),
    }
}

/// Check the optional (B, T-1, n, n) cross-timestep blocks.
pub(crate) fn check_off_diag(
    what: &'static str,
    off: Option<&Tensor>,
    nb: usize,
    tt: usize,
    n: usize,
) -> Result<()> {
    match (tt, off) {
        (1, None) => Ok(()),
        (1, Some(x)) => check_dims(what, &[nb, 0, n, n], x.dims()),
        (_, Some(x)) => check_dims(what, &[nb, tt - 1, n, n], x.dims()),
        (_, None) => Err(PosteriorError::ShapeMismatch {
            what,
            expected: vec![nb, tt - 1, n, n],
            got: vec![],
        }),
    }
}

/// Dynamics prior contribution to the diagonal blocks: shape (T, n, n)
///
/// * t = 0       : Q0⁻¹ + AᵗQ⁻¹A
/// * 0 < t < T-1 : AᵗQ⁻¹A + Q⁻¹
/// * t = T-1     : Q⁻¹
///
/// A single-step trial only sees the initial state prior Q0⁻¹.
pub fn prior_diagonal(dynamics: &DynamicsParams, tt: usize) -> Result<Tensor> {
    check_nonzero("trial length", tt)?;
    let q0inv = dynamics.q0inv()?;
    if tt == 1 {
        return Ok(q0inv.unsqueeze(0)?);
    }

    let qinv = dynamics.qinv()?;
    let aqa = dynamics.at_qinv_a()?;

    let mut blocks = Vec::with_capacity(tt);
    blocks.push((&q0inv + &aqa)?);
    let mid = (&aqa + &qinv)?;
    for _ in 1..(tt - 1) {
        blocks.push(mid.clone());
    }
    blocks.push(qinv);
    Ok(Tensor::stack(&blocks, 0)?)
}

/// Combine encoder precision contributions with the linear dynamics
/// prior into the blocks of the posterior precision M.
///
/// A_t = Λ_t + [0, Λˣ_0, ..., Λˣ_{T-2}]_t + prior_t
/// B_t = cross_t - AᵗQ⁻¹
///
/// The cross-timestep precision Λˣ enters the diagonal with a one-step
/// offset and a zero block at t = 0.
///
/// # Arguments
/// * `blocks` - encoder contributions
/// * `dynamics` - dynamics prior (read only)
///
/// # Returns
/// `AssembledBlocks` with (B, T, n, n), (B, T-1, n, n) and (B, T, n)
pub fn assemble(blocks: &PrecisionBlocks, dynamics: &DynamicsParams) -> Result<AssembledBlocks> {
    let (nb, tt, n) = block_dims("lambda", &blocks.lambda)?;
    check_nonzero("batch", nb)?;
    check_nonzero("trial length", tt)?;
    check_nonzero("latent dimension", n)?;

    check_dims("dynamics", &[n, n], &[dynamics.dim(), dynamics.dim()])?;
    check_dims("weighted mean", &[nb, tt, n], blocks.weighted_mean.dims())?;
    check_off_diag("lambda_x", blocks.lambda_x.as_ref(), nb, tt, n)?;
    check_off_diag("cross", blocks.cross.as_ref(), nb, tt, n)?;

    let prior = prior_diagonal(dynamics, tt)?;
    let mut diag = blocks.lambda.broadcast_add(&prior)?;

    let off_diag = match (&blocks.lambda_x, &blocks.cross) {
        (Some(lambda_x), Some(cross)) if tt > 1 => {
            let pad = zero_blocks(nb, n, lambda_x.dtype(), lambda_x.device())?;
            let shifted = Tensor::cat(&[&pad, lambda_x], 1)?;
            diag = (diag + shifted)?;
            Some(cross.broadcast_sub(&dynamics.at_qinv()?)?)
        }
        _ => None,
    };

    debug!("assembled {} trial(s) of {} block(s), dim {}", nb, tt, n);

    Ok(AssembledBlocks {
        diag,
        off_diag,
        weighted_mean: blocks.weighted_mean.clone(),
    })
}

fn zero_blocks(nb: usize, n: usize, dtype: DType, dev: &Device) -> Result<Tensor> {
    Ok(Tensor::zeros((nb, 1, n, n), dtype, dev)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn identity_dynamics(n: usize) -> Result<DynamicsParams> {
        let eye = Tensor::eye(n, DType::F64, &Device::Cpu)?;
        DynamicsParams::new((&eye * 0.5)?, eye.clone(), (&eye * 2.0)?)
    }

    fn entry(x: &Tensor, b: usize, t: usize, i: usize, j: usize) -> Result<f64> {
        Ok(x.get(b)?.get(t)?.get(i)?.get(j)?.to_scalar::<f64>()?)
    }

    #[test]
    fn test_prior_diagonal() -> Result<()> {
        // A = 0.5 I, Q⁻¹ = I, Q0⁻¹ = 4 I
        let dynamics = identity_dynamics(2)?;
        let prior = prior_diagonal(&dynamics, 4)?;
        assert_eq!(prior.dims(), &[4, 2, 2]);

        let diag: Vec<Vec<f64>> = batched_diagonal_2d(&prior)?;
        assert!((diag[0][0] - 4.25).abs() < 1e-12);
        assert!((diag[1][0] - 1.25).abs() < 1e-12);
        assert!((diag[2][1] - 1.25).abs() < 1e-12);
        assert!((diag[3][1] - 1.0).abs() < 1e-12);

        let single = prior_diagonal(&dynamics, 1)?;
        let diag: Vec<Vec<f64>> = batched_diagonal_2d(&single)?;
        assert!((diag[0][0] - 4.0).abs() < 1e-12);
        Ok(())
    }

    fn batched_diagonal_2d(x: &Tensor) -> Result<Vec<Vec<f64>>> {
        Ok(crate::posterior::batched_diagonal(x)?.to_vec2()?)
    }

    /// The cross-timestep precision Λˣ_t lands on diagonal block t+1,
    /// and block 0 receives nothing from it.
    #[test]
    fn test_cross_precision_offset() -> Result<()> {
        let dev = Device::Cpu;
        let (nb, tt, n) = (1, 3, 2);
        let dynamics = identity_dynamics(n)?;

        let lambda = Tensor::zeros((nb, tt, n, n), DType::F64, &dev)?;
        let lambda_x = Tensor::new(&[10f64, 20.], &dev)?
            .reshape((1, 2, 1, 1))?
            .broadcast_mul(&Tensor::eye(n, DType::F64, &dev)?)?;
        let cross = Tensor::zeros((nb, tt - 1, n, n), DType::F64, &dev)?;
        let weighted_mean = Tensor::zeros((nb, tt, n), DType::F64, &dev)?;

        let blocks = PrecisionBlocks {
            lambda,
            lambda_x: Some(lambda_x),
            cross: Some(cross),
            weighted_mean,
        };
        let out = assemble(&blocks, &dynamics)?;
        assert_eq!(out.diag.dims(), &[1, 3, 2, 2]);

        // prior: 4.25, 1.25, 1.0
        assert!((entry(&out.diag, 0, 0, 0, 0)? - 4.25).abs() < 1e-12);
        assert!((entry(&out.diag, 0, 1, 0, 0)? - 11.25).abs() < 1e-12);
        assert!((entry(&out.diag, 0, 2, 1, 1)? - 21.0).abs() < 1e-12);

        // B_t = 0 - AᵗQ⁻¹ = -0.5 I
        let off = out.off_diag.as_ref().expect("off-diagonal blocks");
        assert_eq!(off.dims(), &[1, 2, 2, 2]);
        assert!((entry(off, 0, 1, 0, 0)? + 0.5).abs() < 1e-12);
        assert!(entry(off, 0, 1, 0, 1)?.abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch() -> Result<()> {
        let dev = Device::Cpu;
        let dynamics = identity_dynamics(2)?;

        let blocks = PrecisionBlocks {
            lambda: Tensor::zeros((2, 3, 2, 2), DType::F64, &dev)?,
            lambda_x: Some(Tensor::zeros((2, 3, 2, 2), DType::F64, &dev)?),
            cross: Some(Tensor::zeros((2, 2, 2, 2), DType::F64, &dev)?),
            weighted_mean: Tensor::zeros((2, 3, 2), DType::F64, &dev)?,
        };
        assert!(matches!(
            assemble(&blocks, &dynamics),
            Err(PosteriorError::ShapeMismatch { what: "lambda_x", .. })
        ));

        let blocks = PrecisionBlocks {
            lambda: Tensor::zeros((2, 1, 2, 2), DType::F64, &dev)?,
            lambda_x: None,
            cross: None,
            weighted_mean: Tensor::zeros((2, 1, 3), DType::F64, &dev)?,
        };
        assert!(matches!(
            assemble(&blocks, &dynamics),
            Err(PosteriorError::ShapeMismatch { what: "weighted mean", .. })
        ));

        let blocks = PrecisionBlocks {
            lambda: Tensor::zeros((2, 1, 3, 3), DType::F64, &dev)?,
            lambda_x: None,
            cross: None,
            weighted_mean: Tensor::zeros((2, 1, 3), DType::F64, &dev)?,
        };
        assert!(matches!(
            assemble(&blocks, &dynamics),
            Err(PosteriorError::ShapeMismatch { what: "dynamics", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_missing_cross_terms() -> Result<()> {
        let dev = Device::Cpu;
        let dynamics = identity_dynamics(2)?;
        let blocks = PrecisionBlocks {
            lambda: Tensor::zeros((1, 4, 2, 2), DType::F64, &dev)?,
            lambda_x: None,
            cross: None,
            weighted_mean: Tensor::zeros((1, 4, 2), DType::F64, &dev)?,
        };
        assert!(matches!(
            assemble(&blocks, &dynamics),
            Err(PosteriorError::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
