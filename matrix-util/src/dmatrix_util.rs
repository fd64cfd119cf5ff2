use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};
pub use rand::Rng;
pub use rand_distr::StandardNormal;
pub use rayon::prelude::*;

/// Sample d,n matrix from N(0,1)
pub fn rnorm(dd: usize, nn: usize) -> DMatrix<f64> {
    let rvec = (0..(dd * nn))
        .into_par_iter()
        .map_init(rand::rng, |rng, _| rng.sample(StandardNormal))
        .collect();

    DMatrix::<f64>::from_vec(dd, nn, rvec)
}

/// Sample d,d symmetric positive definite matrix
/// X * X' / d + ridge * I with X ~ N(0,1)
pub fn rspd(dd: usize, ridge: f64) -> DMatrix<f64> {
    let xx = rnorm(dd, dd);
    let mut ret = &xx * xx.transpose() / (dd as f64);
    for i in 0..dd {
        ret[(i, i)] += ridge;
    }
    ret
}

/// log-determinant of a symmetric positive definite matrix
/// log|X| = 2 * sum_i log L[i,i], where X = L * L'
pub fn log_det_spd(xx: &DMatrix<f64>) -> anyhow::Result<f64> {
    let chol = xx
        .clone()
        .cholesky()
        .ok_or_else(|| anyhow::anyhow!("matrix is not positive definite"))?;
    Ok(chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>() * 2.0)
}

/// Solve X * z = b for a symmetric positive definite X
pub fn solve_spd(xx: &DMatrix<f64>, bb: &DVector<f64>) -> anyhow::Result<DVector<f64>> {
    let chol = xx
        .clone()
        .cholesky()
        .ok_or_else(|| anyhow::anyhow!("matrix is not positive definite"))?;
    Ok(chol.solve(bb))
}

/// Concatenate a trajectory of `T` n-vectors into one `T n` vector
pub fn stack_trajectory(xx: &[DVector<f64>]) -> DVector<f64> {
    let values = xx.iter().flat_map(|x| x.iter().copied()).collect::<Vec<_>>();
    DVector::from_vec(values)
}

impl SampleOps for DMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn rnorm(dd: usize, nn: usize) -> Self::Mat {
        rnorm(dd, nn)
    }

    fn rspd(dd: usize, ridge: f64) -> Self::Mat {
        rspd(dd, ridge)
    }
}

impl BlockOps for DMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn block_tridiag(diag: &[Self::Mat], lower: &[Self::Mat]) -> anyhow::Result<Self::Mat> {
        let mut ret = Self::block_bidiag(diag, lower)?;
        let n = diag[0].nrows();
        for (t, b_t) in lower.iter().enumerate() {
            ret.view_mut((t * n, (t + 1) * n), (n, n))
                .copy_from(&b_t.transpose());
        }
        Ok(ret)
    }

    fn block_bidiag(diag: &[Self::Mat], lower: &[Self::Mat]) -> anyhow::Result<Self::Mat> {
        let tt = diag.len();
        if tt == 0 {
            anyhow::bail!("no diagonal blocks");
        }
        if lower.len() + 1 != tt {
            anyhow::bail!(
                "expected {} off-diagonal blocks, got {}",
                tt - 1,
                lower.len()
            );
        }

        let n = diag[0].nrows();
        if diag
            .iter()
            .chain(lower.iter())
            .any(|b| b.nrows() != n || b.ncols() != n)
        {
            anyhow::bail!("all blocks must be {} x {}", n, n);
        }

        let mut ret = DMatrix::<f64>::zeros(tt * n, tt * n);
        for (t, a_t) in diag.iter().enumerate() {
            ret.view_mut((t * n, t * n), (n, n)).copy_from(a_t);
        }
        for (t, b_t) in lower.iter().enumerate() {
            ret.view_mut(((t + 1) * n, t * n), (n, n)).copy_from(b_t);
        }
        Ok(ret)
    }

    fn block(&self, n: usize, i: usize, j: usize) -> Self::Mat {
        self.view((i * n, j * n), (n, n)).into_owned()
    }
}
