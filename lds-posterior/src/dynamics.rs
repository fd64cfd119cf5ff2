use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::posterior::{batched_diagonal, check_dims, check_nonzero, Result};

/// Linear-Gaussian dynamics prior over the latent trajectory
///
/// x(0) ~ N(0, Q0)
/// x(t) ~ N(A x(t-1), Q)
///
/// Both innovation precisions are stored through square roots so
/// that `Q⁻¹ = R Rᵗ` and `Q0⁻¹ = R0 R0ᵗ` stay positive semidefinite
/// whatever the optimizer does to `R` and `R0`.
///
/// The engine only ever reads these tensors; updates belong to the
/// optimizer that owns the underlying variables.
#[derive(Clone, Debug)]
pub struct DynamicsParams {
    /// Dynamics matrix A: shape (n, n)
    a: Tensor,
    /// Square root of the innovation precision: shape (n, n)
    qinv_chol: Tensor,
    /// Square root of the initial precision: shape (n, n)
    q0inv_chol: Tensor,
}

impl DynamicsParams {
    /// Wrap existing tensors.
    ///
    /// # Arguments
    /// * `a` - dynamics matrix (n x n)
    /// * `qinv_chol` - square root of Q⁻¹ (n x n)
    /// * `q0inv_chol` - square root of Q0⁻¹ (n x n)
    pub fn new(a: Tensor, qinv_chol: Tensor, q0inv_chol: Tensor) -> Result<Self> {
        let (n, _) = a.dims2()?;
        check_nonzero("latent dimension", n)?;
        check_dims("dynamics matrix A", &[n, n], a.dims())?;
        check_dims("QinvChol", &[n, n], qinv_chol.dims())?;
        check_dims("Q0invChol", &[n, n], q0inv_chol.dims())?;
        Ok(Self {
            a,
            qinv_chol,
            q0inv_chol,
        })
    }

    /// Create trainable dynamics parameters with these variables:
    ///
    /// * `A.delta` so that `A = 0.9 I + A.delta`
    /// * `QinvChol.delta` so that `QinvChol = I + QinvChol.delta`
    /// * `Q0invChol.delta` so that `Q0invChol = I + Q0invChol.delta`
    ///
    /// All deltas start at zero, i.e., slowly decaying dynamics with
    /// unit innovation precision.
    pub fn init(vb: VarBuilder, dim: usize) -> Result<Self> {
        check_nonzero("latent dimension", dim)?;
        let zero = candle_nn::Init::Const(0.0);
        let eye = Tensor::eye(dim, vb.dtype(), vb.device())?;

        let a_delta = vb.get_with_hints((dim, dim), "A.delta", zero)?;
        let qinv_delta = vb.get_with_hints((dim, dim), "QinvChol.delta", zero)?;
        let q0inv_delta = vb.get_with_hints((dim, dim), "Q0invChol.delta", zero)?;

        Self::new(
            ((&eye * 0.9)? + a_delta)?,
            (&eye + qinv_delta)?,
            (&eye + q0inv_delta)?,
        )
    }

    pub fn dim(&self) -> usize {
        self.a.dims()[0]
    }

    pub fn dtype(&self) -> DType {
        self.a.dtype()
    }

    pub fn device(&self) -> &Device {
        self.a.device()
    }

    pub fn a(&self) -> &Tensor {
        &self.a
    }

    pub fn qinv_chol(&self) -> &Tensor {
        &self.qinv_chol
    }

    pub fn q0inv_chol(&self) -> &Tensor {
        &self.q0inv_chol
    }

    /// Innovation precision Q⁻¹ = R Rᵗ
    pub fn qinv(&self) -> Result<Tensor> {
        Ok(self.qinv_chol.matmul(&self.qinv_chol.t()?)?)
    }

    /// Initial precision Q0⁻¹ = R0 R0ᵗ
    pub fn q0inv(&self) -> Result<Tensor> {
        Ok(self.q0inv_chol.matmul(&self.q0inv_chol.t()?)?)
    }

    /// Aᵗ Q⁻¹
    pub fn at_qinv(&self) -> Result<Tensor> {
        Ok(self.a.t()?.matmul(&self.qinv()?)?)
    }

    /// Aᵗ Q⁻¹ A
    pub fn at_qinv_a(&self) -> Result<Tensor> {
        Ok(self.at_qinv()?.matmul(&self.a)?)
    }

    /// Innovation noise penalty
    ///
    /// p * [ sum_i log Q⁻¹(i,i) + sum_i log Q0⁻¹(i,i) ]
    ///
    /// # Returns
    /// Scalar tensor
    pub fn noise_penalty(&self, p: f64) -> Result<Tensor> {
        let qinv = batched_diagonal(&self.qinv()?)?.log()?.sum_all()?;
        let q0inv = batched_diagonal(&self.q0inv()?)?.log()?.sum_all()?;
        Ok(((qinv + q0inv)? * p)?)
    }

    /// Copy the parameters into a different dtype, cutting them off
    /// from any training graph.
    pub fn to_dtype(&self, dtype: DType) -> Result<Self> {
        Ok(Self {
            a: self.a.detach().to_dtype(dtype)?,
            qinv_chol: self.qinv_chol.detach().to_dtype(dtype)?,
            q0inv_chol: self.q0inv_chol.detach().to_dtype(dtype)?,
        })
    }
}
