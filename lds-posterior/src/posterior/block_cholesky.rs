use candle_core::{DType, Tensor};
use log::{debug, warn};

use super::blocks::{block_dims, check_off_diag};
use super::error::{check_nonzero, PosteriorError, Result};
use super::triangular::solve_lower;

/// Configuration for the block Cholesky factorization.
#[derive(Debug, Clone)]
pub struct BlockCholeskyConfig {
    /// A pivot must be strictly greater than this to be accepted
    pub pivot_tolerance: f64,
}

impl Default for BlockCholeskyConfig {
    fn default() -> Self {
        Self {
            pivot_tolerance: 1e-12,
        }
    }
}

impl BlockCholeskyConfig {
    pub fn new(pivot_tolerance: f64) -> Self {
        Self { pivot_tolerance }
    }
}

/// Block-lower-bidiagonal Cholesky factor L of a block-tridiagonal
/// SPD matrix M = L Lᵗ
///
/// ```text
/// | C_0               |
/// | L_0  C_1          |
/// |      L_1  C_2     |
/// |           ...     |
/// ```
#[derive(Clone, Debug)]
pub struct BlockCholesky {
    /// Lower-triangular diagonal blocks C_t: shape (B, T, n, n)
    diag: Tensor,
    /// Sub-diagonal blocks L_t: shape (B, T-1, n, n), `None` iff T = 1
    off_diag: Option<Tensor>,
}

impl BlockCholesky {
    pub fn diag(&self) -> &Tensor {
        &self.diag
    }

    pub fn off_diag(&self) -> Option<&Tensor> {
        self.off_diag.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.diag.dims()[0]
    }

    pub fn trial_len(&self) -> usize {
        self.diag.dims()[1]
    }

    pub fn dim(&self) -> usize {
        self.diag.dims()[2]
    }

    /// C_t: shape (B, n, n)
    pub(crate) fn diag_block(&self, t: usize) -> Result<Tensor> {
        Ok(self.diag.narrow(1, t, 1)?.squeeze(1)?)
    }

    /// L_t: shape (B, n, n)
    pub(crate) fn off_diag_block(&self, t: usize) -> Result<Tensor> {
        match &self.off_diag {
            Some(off) => Ok(off.narrow(1, t, 1)?.squeeze(1)?),
            None => Err(PosteriorError::DimensionZero {
                what: "off-diagonal factor blocks",
            }),
        }
    }
}

/// Factorize a block-tridiagonal SPD matrix with the two-term
/// recursion
///
/// C_0 = chol(A_0)
/// L_{t-1} = (C_{t-1}⁻¹ B_{t-1}ᵗ)ᵗ
/// C_t = chol(A_t - L_{t-1} L_{t-1}ᵗ)
///
/// Every step works on all batch elements at once. Cost is O(T) block
/// operations instead of the O(T³) of a dense factorization.
///
/// # Arguments
/// * `diag` - diagonal blocks A_t: shape (B, T, n, n)
/// * `off_diag` - sub-diagonal blocks B_t at (t+1, t): shape (B, T-1, n, n)
/// * `config` - pivot tolerance
///
/// # Returns
/// `BlockCholesky`, or `NonPositiveDefinite` naming the first failing
/// batch element and step
pub fn factorize(
    diag: &Tensor,
    off_diag: Option<&Tensor>,
    config: &BlockCholeskyConfig,
) -> Result<BlockCholesky> {
    let (nb, tt, n) = block_dims("diagonal blocks", diag)?;
    check_nonzero("batch", nb)?;
    check_nonzero("trial length", tt)?;
    check_nonzero("latent dimension", n)?;
    check_off_diag("off-diagonal blocks", off_diag, nb, tt, n)?;

    let tol = config.pivot_tolerance;

    let a_0 = diag.narrow(1, 0, 1)?.squeeze(1)?;
    let mut c_prev = batched_cholesky(&a_0, 0, tol)?;

    let mut c_blocks = Vec::with_capacity(tt);
    let mut l_blocks = Vec::with_capacity(tt.saturating_sub(1));

    if let Some(off_diag) = off_diag.filter(|_| tt > 1) {
        for t in 1..tt {
            let b_prev = off_diag.narrow(1, t - 1, 1)?.squeeze(1)?;
            let l_prev = solve_lower(&c_prev, &b_prev.t()?)?.t()?.contiguous()?;

            let a_t = diag.narrow(1, t, 1)?.squeeze(1)?;
            let schur = a_t.sub(&l_prev.matmul(&l_prev.t()?.contiguous()?)?)?;
            let c_t = batched_cholesky(&schur, t, tol)?;

            c_blocks.push(c_prev);
            l_blocks.push(l_prev);
            c_prev = c_t;
        }
    }
    c_blocks.push(c_prev);

    debug!("factorized {} x {} blocks of dim {}", nb, tt, n);

    Ok(BlockCholesky {
        diag: Tensor::stack(&c_blocks, 1)?,
        off_diag: if l_blocks.is_empty() {
            None
        } else {
            Some(Tensor::stack(&l_blocks, 1)?)
        },
    })
}

/// Lower Cholesky factor of a batch of SPD matrices, column by column
///
/// l(j,j) = sqrt( a(j,j) - sum_{k<j} l(j,k)² )
/// l(i,j) = ( a(i,j) - sum_{k<j} l(i,k) l(j,k) ) / l(j,j),  i > j
///
/// Only the lower triangle of `a` is read. Built from differentiable
/// tensor operations so gradients reach `a`.
///
/// # Arguments
/// * `a` - shape (B, n, n)
/// * `step` - time step, for error reporting
/// * `tol` - pivot tolerance
pub(crate) fn batched_cholesky(a: &Tensor, step: usize, tol: f64) -> Result<Tensor> {
    let (nb, n, _) = a.dims3()?;
    let mut cols: Vec<Tensor> = Vec::with_capacity(n);

    for j in 0..n {
        // a(j.., j): (B, n-j, 1)
        let a_col = a.narrow(2, j, 1)?.narrow(1, j, n - j)?;

        let resid = if j == 0 {
            a_col
        } else {
            let l_done = Tensor::cat(&cols, 2)?;
            let l_below = l_done.narrow(1, j, n - j)?.contiguous()?;
            let l_row = l_done.narrow(1, j, 1)?.t()?.contiguous()?;
            a_col.sub(&l_below.matmul(&l_row)?)?
        };

        let pivot = resid.narrow(1, 0, 1)?;
        check_pivots(&pivot, step, j, tol)?;
        let l_jj = pivot.sqrt()?;

        let mut col = Vec::with_capacity(3);
        if j > 0 {
            col.push(Tensor::zeros((nb, j, 1), a.dtype(), a.device())?);
        }
        col.push(l_jj.clone());
        if j + 1 < n {
            col.push(resid.narrow(1, 1, n - j - 1)?.broadcast_div(&l_jj)?);
        }
        cols.push(Tensor::cat(&col, 1)?);
    }

    Ok(Tensor::cat(&cols, 2)?)
}

/// Reject the first pivot that is not greater than `tol` (NaN included)
fn check_pivots(pivot: &Tensor, step: usize, pivot_index: usize, tol: f64) -> Result<()> {
    let values = pivot
        .detach()
        .flatten_all()?
        .to_dtype(DType::F64)?
        .to_vec1::<f64>()?;

    if let Some((batch, &value)) = values.iter().enumerate().find(|&(_, &v)| !(v > tol)) {
        warn!(
            "non-positive pivot {:e} at batch {}, step {}, row {}",
            value, batch, step, pivot_index
        );
        return Err(PosteriorError::NonPositiveDefinite {
            batch,
            step,
            pivot_index,
            pivot: value,
        });
    }
    Ok(())
}
