use candle_core::{Tensor, D};

use super::block_cholesky::BlockCholesky;
use super::error::Result;

/// ln(2π)
pub(crate) const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Diagonal entries of a stack of square matrices
///
/// # Arguments
/// * `x` - shape (..., n, n)
///
/// # Returns
/// Diagonal, shape (..., n)
pub fn batched_diagonal(x: &Tensor) -> Result<Tensor> {
    let n = x.dim(D::Minus1)?;
    let eye = Tensor::eye(n, x.dtype(), x.device())?;
    Ok(x.broadcast_mul(&eye)?.sum(D::Minus1)?)
}

/// Log-determinant of the factorized block-tridiagonal matrix
///
/// log|M| = 2 * sum_t sum_i log C_t[i,i]
///
/// since |M| = |L|² and the determinant of a block-triangular factor
/// is the product of its diagonal blocks' determinants.
///
/// # Arguments
/// * `factor` - block Cholesky factor of M
///
/// # Returns
/// Log-determinant per batch element, shape (B,)
pub fn log_determinant(factor: &BlockCholesky) -> Result<Tensor> {
    // (B, T, n)
    let diag = batched_diagonal(factor.diag())?;
    Ok((diag.log()?.sum(2)?.sum(1)? * 2.0)?)
}

/// Entropy of N(m, M⁻¹) over a `T x n` trajectory
///
/// H = -0.5 * log|M| + 0.5 * T * n * (1 + ln 2π)
///
/// # Arguments
/// * `log_det` - log|M|, shape (B,)
/// * `num_elem` - T * n
pub fn gaussian_entropy(log_det: &Tensor, num_elem: usize) -> Result<Tensor> {
    let konst = 0.5 * num_elem as f64 * (1.0 + LN_2PI);
    Ok(log_det.affine(-0.5, konst)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posterior::{factorize, BlockCholeskyConfig};
    use candle_core::{DType, Device};

    #[test]
    fn test_diagonal() -> Result<()> {
        let x = Tensor::new(&[[[1f64, 2.], [3., 4.]], [[5., 6.], [7., 8.]]], &Device::Cpu)?;
        let d: Vec<Vec<f64>> = batched_diagonal(&x)?.to_vec2()?;
        assert_eq!(d, vec![vec![1., 4.], vec![5., 8.]]);
        Ok(())
    }

    #[test]
    fn test_log_det_scaled_identity() -> Result<()> {
        // M = 4 I over T = 3, n = 2 => log|M| = 6 log 4
        let dev = Device::Cpu;
        let diag = (Tensor::eye(2, DType::F64, &dev)? * 4.0)?
            .unsqueeze(0)?
            .unsqueeze(0)?
            .broadcast_as((1, 3, 2, 2))?
            .contiguous()?;
        let off = Tensor::zeros((1, 2, 2, 2), DType::F64, &dev)?;

        let factor = factorize(&diag, Some(&off), &BlockCholeskyConfig::default())?;
        let log_det: Vec<f64> = log_determinant(&factor)?.to_vec1()?;
        assert!((log_det[0] - 6.0 * 4f64.ln()).abs() < 1e-10);

        let entropy: Vec<f64> = gaussian_entropy(&log_determinant(&factor)?, 6)?.to_vec1()?;
        let expected = -3.0 * 4f64.ln() + 3.0 * (1.0 + LN_2PI);
        assert!((entropy[0] - expected).abs() < 1e-10);
        Ok(())
    }
}
