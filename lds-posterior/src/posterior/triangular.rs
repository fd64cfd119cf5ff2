use candle_core::Tensor;

use super::block_cholesky::BlockCholesky;
use super::error::{check_dims, Result};

/// Solve C X = R for a batch of lower-triangular C (forward substitution)
///
/// # Arguments
/// * `c` - shape (B, n, n), lower triangular
/// * `r` - shape (B, n, m)
///
/// # Returns
/// X: shape (B, n, m)
pub(crate) fn solve_lower(c: &Tensor, r: &Tensor) -> Result<Tensor> {
    let (_, n, _) = c.dims3()?;
    let mut rows: Vec<Tensor> = Vec::with_capacity(n);

    for i in 0..n {
        let r_i = r.narrow(1, i, 1)?;
        let c_ii = c.narrow(1, i, 1)?.narrow(2, i, 1)?;

        let num = if i == 0 {
            r_i
        } else {
            // C(i, 0..i) X(0..i, :)
            let x_done = Tensor::cat(&rows, 1)?;
            let c_row = c.narrow(1, i, 1)?.narrow(2, 0, i)?.contiguous()?;
            r_i.sub(&c_row.matmul(&x_done)?)?
        };
        rows.push(num.broadcast_div(&c_ii)?);
    }

    Ok(Tensor::cat(&rows, 1)?)
}

/// Solve Cᵗ X = R for a batch of lower-triangular C (backward substitution)
///
/// # Arguments
/// * `c` - shape (B, n, n), lower triangular
/// * `r` - shape (B, n, m)
///
/// # Returns
/// X: shape (B, n, m)
pub(crate) fn solve_lower_transpose(c: &Tensor, r: &Tensor) -> Result<Tensor> {
    let (_, n, _) = c.dims3()?;
    // rows i+1.. of the solution, in ascending order
    let mut rows: Vec<Tensor> = Vec::with_capacity(n);

    for i in (0..n).rev() {
        let r_i = r.narrow(1, i, 1)?;
        let c_ii = c.narrow(1, i, 1)?.narrow(2, i, 1)?;

        let num = if i + 1 == n {
            r_i
        } else {
            // Cᵗ(i, i+1..) = C(i+1.., i)ᵗ
            let x_after = Tensor::cat(&rows, 1)?;
            let c_col = c.narrow(2, i, 1)?.narrow(1, i + 1, n - i - 1)?.t()?.contiguous()?;
            r_i.sub(&c_col.matmul(&x_after)?)?
        };
        rows.insert(0, num.broadcast_div(&c_ii)?);
    }

    Ok(Tensor::cat(&rows, 1)?)
}

/// (B, T, n) -> (B, n, 1) at step t
fn step_column(x: &Tensor, t: usize) -> Result<Tensor> {
    Ok(x.narrow(1, t, 1)?.squeeze(1)?.unsqueeze(2)?)
}

fn check_rhs(factor: &BlockCholesky, b: &Tensor) -> Result<()> {
    check_dims(
        "right-hand side",
        &[factor.batch_size(), factor.trial_len(), factor.dim()],
        b.dims(),
    )
}

/// Block forward substitution: solve L x = b
///
/// x_0 = C_0⁻¹ b_0
/// x_t = C_t⁻¹ (b_t - L_{t-1} x_{t-1})
///
/// # Arguments
/// * `factor` - block Cholesky factor
/// * `b` - shape (B, T, n)
///
/// # Returns
/// x: shape (B, T, n)
pub fn forward_solve(factor: &BlockCholesky, b: &Tensor) -> Result<Tensor> {
    check_rhs(factor, b)?;
    let tt = factor.trial_len();

    let mut xs: Vec<Tensor> = Vec::with_capacity(tt);
    for t in 0..tt {
        let b_t = step_column(b, t)?;
        let rhs = match xs.last() {
            Some(x_prev) => {
                let l_prev = factor.off_diag_block(t - 1)?.contiguous()?;
                b_t.sub(&l_prev.matmul(x_prev)?)?
            }
            None => b_t,
        };
        xs.push(solve_lower(&factor.diag_block(t)?, &rhs)?);
    }

    Ok(Tensor::stack(&xs, 1)?.squeeze(3)?)
}

/// Block backward substitution: solve Lᵗ x = b
///
/// x_{T-1} = C_{T-1}⁻ᵗ b_{T-1}
/// x_t = C_t⁻ᵗ (b_t - L_tᵗ x_{t+1})
///
/// # Arguments
/// * `factor` - block Cholesky factor
/// * `b` - shape (B, T, n)
///
/// # Returns
/// x: shape (B, T, n)
pub fn backward_solve(factor: &BlockCholesky, b: &Tensor) -> Result<Tensor> {
    check_rhs(factor, b)?;
    let tt = factor.trial_len();

    let mut xs: Vec<Tensor> = Vec::with_capacity(tt);
    for t in (0..tt).rev() {
        let b_t = step_column(b, t)?;
        let rhs = match xs.first() {
            Some(x_next) => {
                let l_t = factor.off_diag_block(t)?.t()?.contiguous()?;
                b_t.sub(&l_t.matmul(x_next)?)?
            }
            None => b_t,
        };
        xs.insert(0, solve_lower_transpose(&factor.diag_block(t)?, &rhs)?);
    }

    Ok(Tensor::stack(&xs, 1)?.squeeze(3)?)
}

/// Block-bidiagonal product y = Lᵗ x
///
/// y_t = C_tᵗ x_t + L_tᵗ x_{t+1}, with no second term at t = T-1
///
/// # Arguments
/// * `factor` - block Cholesky factor
/// * `x` - shape (B, T, n)
///
/// # Returns
/// y: shape (B, T, n)
pub fn multiply_transpose(factor: &BlockCholesky, x: &Tensor) -> Result<Tensor> {
    check_rhs(factor, x)?;
    let tt = factor.trial_len();

    let mut ys: Vec<Tensor> = Vec::with_capacity(tt);
    for t in 0..tt {
        let c_t = factor.diag_block(t)?.t()?.contiguous()?;
        let mut y_t = c_t.matmul(&step_column(x, t)?)?;
        if t + 1 < tt {
            let l_t = factor.off_diag_block(t)?.t()?.contiguous()?;
            y_t = (y_t + l_t.matmul(&step_column(x, t + 1)?)?)?;
        }
        ys.push(y_t);
    }

    Ok(Tensor::stack(&ys, 1)?.squeeze(3)?)
}

/// Posterior mean M⁻¹ (Λμ) from two block substitutions,
/// never forming M⁻¹
///
/// # Arguments
/// * `factor` - block Cholesky factor of M
/// * `weighted_mean` - Λ_t μ_t: shape (B, T, n)
///
/// # Returns
/// Posterior mean: shape (B, T, n)
pub fn posterior_mean(factor: &BlockCholesky, weighted_mean: &Tensor) -> Result<Tensor> {
    let intermediate = forward_solve(factor, weighted_mean)?;
    backward_solve(factor, &intermediate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_triangular_solves() -> Result<()> {
        let dev = Device::Cpu;
        // C = [[2, 0], [1, 4]]
        let c = Tensor::new(&[[[2f64, 0.], [1., 4.]]], &dev)?;
        let r = Tensor::new(&[[[2f64], [9.]]], &dev)?;

        // C x = r => x = [1, 2]
        let x: Vec<Vec<Vec<f64>>> = solve_lower(&c, &r)?.to_vec3()?;
        assert!((x[0][0][0] - 1.0).abs() < 1e-12);
        assert!((x[0][1][0] - 2.0).abs() < 1e-12);

        // Cᵗ x = r => [[2, 1], [0, 4]] x = [2, 9] => x = [-1/8, 9/4]
        let x: Vec<Vec<Vec<f64>>> = solve_lower_transpose(&c, &r)?.to_vec3()?;
        assert!((x[0][1][0] - 2.25).abs() < 1e-12);
        assert!((x[0][0][0] + 0.125).abs() < 1e-12);
        Ok(())
    }
}
