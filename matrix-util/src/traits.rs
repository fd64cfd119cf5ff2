use candle_core::Device;
use candle_core::Tensor;

/// Reading off from `Tensor`
pub trait ConvertMatOps {
    type Mat;
    type Scalar;

    fn from_tensor(_: &Tensor) -> anyhow::Result<Self::Mat>;
    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor>;
}

/// Operations to sample random matrices, only works for
/// `nalgebra::DMatrix`
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm(dd: usize, nn: usize) -> Self::Mat;

    /// Sample a symmetric positive definite matrix `X Xᵗ / d + ridge I`
    fn rspd(dd: usize, ridge: Self::Scalar) -> Self::Mat;
}

/// Dense views of block-structured matrices with square `n x n`
/// blocks, the way a block-tridiagonal precision matrix over a
/// `T`-step trajectory is laid out.
pub trait BlockOps {
    type Mat;
    type Scalar;

    /// Symmetric block-tridiagonal matrix of size `(T n) x (T n)`
    ///
    /// * `diag` - `T` diagonal blocks
    /// * `lower` - `T-1` blocks at position `(t+1, t)`; the upper
    ///   blocks are their transposes
    fn block_tridiag(diag: &[Self::Mat], lower: &[Self::Mat]) -> anyhow::Result<Self::Mat>;

    /// Lower block-bidiagonal matrix with `diag` blocks at `(t, t)`
    /// and `lower` blocks at `(t+1, t)`
    fn block_bidiag(diag: &[Self::Mat], lower: &[Self::Mat]) -> anyhow::Result<Self::Mat>;

    /// Copy out the `(i, j)`-th `n x n` block
    fn block(&self, n: usize, i: usize, j: usize) -> Self::Mat;
}
