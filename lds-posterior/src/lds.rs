use candle_core::{DType, Device};
use matrix_util::dmatrix_util::{log_det_spd, solve_spd};
use matrix_util::traits::ConvertMatOps;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::dynamics::DynamicsParams;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Linear-Gaussian state space model
///
/// x(0) ~ N(0, Q0)
/// x(t) ~ N(A x(t-1), Q)
/// y(t) ~ N(x(t), σ² I)
///
/// Dense `nalgebra` matrices; meant for simulating trials and for
/// checking the batched posterior against dense references.
#[derive(Clone, Debug)]
pub struct LinearGaussianLds {
    a: DMatrix<f64>,
    q_chol: DMatrix<f64>,
    q0_chol: DMatrix<f64>,
}

fn lower_cholesky(what: &str, x: &DMatrix<f64>) -> anyhow::Result<DMatrix<f64>> {
    Ok(x.clone()
        .cholesky()
        .ok_or_else(|| anyhow::anyhow!("{} is not positive definite", what))?
        .l())
}

fn spd_inverse(what: &str, x: &DMatrix<f64>) -> anyhow::Result<DMatrix<f64>> {
    let eye = DMatrix::<f64>::identity(x.nrows(), x.ncols());
    Ok(x.clone()
        .cholesky()
        .ok_or_else(|| anyhow::anyhow!("{} is not positive definite", what))?
        .solve(&eye))
}

fn isotropic(n: usize, scale: f64) -> DMatrix<f64> {
    DMatrix::<f64>::identity(n, n) * scale
}

impl LinearGaussianLds {
    /// # Arguments
    /// * `a` - dynamics matrix (n x n)
    /// * `q` - innovation covariance (n x n, SPD)
    /// * `q0` - initial state covariance (n x n, SPD)
    pub fn new(a: DMatrix<f64>, q: &DMatrix<f64>, q0: &DMatrix<f64>) -> anyhow::Result<Self> {
        let n = a.nrows();
        if n == 0 || a.ncols() != n || q.shape() != (n, n) || q0.shape() != (n, n) {
            anyhow::bail!("dynamics, Q and Q0 must all be {} x {}", n, n);
        }
        Ok(Self {
            a,
            q_chol: lower_cholesky("Q", q)?,
            q0_chol: lower_cholesky("Q0", q0)?,
        })
    }

    /// A = decay I, Q = process_std² I, Q0 = initial_std² I
    pub fn isotropic(dim: usize, decay: f64, process_std: f64, initial_std: f64) -> anyhow::Result<Self> {
        Self::new(
            isotropic(dim, decay),
            &isotropic(dim, process_std * process_std),
            &isotropic(dim, initial_std * initial_std),
        )
    }

    pub fn dim(&self) -> usize {
        self.a.nrows()
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn q(&self) -> DMatrix<f64> {
        &self.q_chol * self.q_chol.transpose()
    }

    pub fn q0(&self) -> DMatrix<f64> {
        &self.q0_chol * self.q0_chol.transpose()
    }

    fn rnorm_vec<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        DVector::from_iterator(self.dim(), (0..self.dim()).map(|_| rng.sample(StandardNormal)))
    }

    /// Draw a latent trajectory x(0), ..., x(T-1)
    pub fn sample_latent<R: Rng>(&self, tt: usize, rng: &mut R) -> Vec<DVector<f64>> {
        let mut xs = Vec::with_capacity(tt);
        for t in 0..tt {
            let x_t = match t {
                0 => &self.q0_chol * self.rnorm_vec(rng),
                _ => &self.a * &xs[t - 1] + &self.q_chol * self.rnorm_vec(rng),
            };
            xs.push(x_t);
        }
        xs
    }

    /// y(t) = x(t) + noise_std * e(t)
    pub fn sample_observations<R: Rng>(
        &self,
        xs: &[DVector<f64>],
        noise_std: f64,
        rng: &mut R,
    ) -> Vec<DVector<f64>> {
        xs.iter()
            .map(|x| x + self.rnorm_vec(rng) * noise_std)
            .collect()
    }

    /// Prior log-density of a latent trajectory
    ///
    /// log N(x(0) | 0, Q0) + sum_t log N(x(t) | A x(t-1), Q)
    pub fn log_density(&self, xs: &[DVector<f64>]) -> anyhow::Result<f64> {
        let n = self.dim() as f64;
        let q = self.q();
        let q0 = self.q0();
        let log_det_q = log_det_spd(&q)?;

        let mut llik = 0.0;
        for (t, x_t) in xs.iter().enumerate() {
            let (resid, cov, log_det) = match t {
                0 => (x_t.clone(), &q0, log_det_spd(&q0)?),
                _ => (x_t - &self.a * &xs[t - 1], &q, log_det_q),
            };
            let maha = resid.dot(&solve_spd(cov, &resid)?);
            llik -= 0.5 * (n * LN_2PI + log_det + maha);
        }
        Ok(llik)
    }

    /// Blocks of the prior precision over a `T`-step trajectory:
    /// `T` diagonal blocks and `T-1` blocks at position (t+1, t)
    pub fn prior_precision_blocks(
        &self,
        tt: usize,
    ) -> anyhow::Result<(Vec<DMatrix<f64>>, Vec<DMatrix<f64>>)> {
        let qinv = spd_inverse("Q", &self.q())?;
        let q0inv = spd_inverse("Q0", &self.q0())?;
        let aqa = self.a.transpose() * &qinv * &self.a;

        let diag = (0..tt)
            .map(|t| {
                let mut blk = if t == 0 { q0inv.clone() } else { qinv.clone() };
                if t + 1 < tt {
                    blk += &aqa;
                }
                blk
            })
            .collect();
        let lower = (0..tt.saturating_sub(1)).map(|_| -(&qinv * &self.a)).collect();
        Ok((diag, lower))
    }

    /// Batched-engine parameters with `QinvChol = chol(Q⁻¹)` and
    /// `Q0invChol = chol(Q0⁻¹)`
    pub fn dynamics_params(&self, dtype: DType, dev: &Device) -> anyhow::Result<DynamicsParams> {
        let qinv_chol = lower_cholesky("Q⁻¹", &spd_inverse("Q", &self.q())?)?;
        let q0inv_chol = lower_cholesky("Q0⁻¹", &spd_inverse("Q0", &self.q0())?)?;

        Ok(DynamicsParams::new(
            self.a.to_tensor(dev)?.to_dtype(dtype)?,
            qinv_chol.to_tensor(dev)?.to_dtype(dtype)?,
            q0inv_chol.to_tensor(dev)?.to_dtype(dtype)?,
        )?)
    }
}
