//! Block-tridiagonal Gaussian posterior over latent trajectories.
//!
//! For a linear-Gaussian dynamics prior and per-timestep Gaussian
//! recognition terms, the posterior precision M over a T-step trajectory
//! is block-tridiagonal:
//!
//! ```text
//! | A_0  B_0ᵗ             |
//! | B_0  A_1  B_1ᵗ        |
//! |      B_1  A_2  ...    |
//! |           ...  A_{T-1}|
//! ```
//!
//! Everything here works in O(T) block operations on batched tensors
//! and never forms M or M⁻¹ densely.
//!
//! # Components
//!
//! - [`assemble`]: encoder blocks + dynamics prior -> blocks of M
//! - [`factorize`]: block Cholesky M = L Lᵗ
//! - [`posterior_mean`], [`forward_solve`], [`backward_solve`]
//! - [`sample`], [`sample_n`]: reparameterized draws
//! - [`log_determinant`], [`gaussian_entropy`]
//! - [`SmoothingPosterior`], [`JointPosterior`]: the assembled
//!   distribution objects
//!
//! # Example
//!
//! ```ignore
//! let precision = encoder.encode(&y)?.precision_blocks()?;
//! let post = SmoothingPosterior::new(&precision, &dynamics, &SmoothingConfig::default())?;
//! let x = post.sample(&mut RngNoise(StdRng::seed_from_u64(42)))?;
//! let loss = post.regularized_entropy()?.mean_all()?;
//! ```

mod block_cholesky;
mod blocks;
mod error;
mod joint;
mod log_det;
mod sampler;
mod smoothing;
mod triangular;

pub use block_cholesky::{factorize, BlockCholesky, BlockCholeskyConfig};
pub use blocks::{assemble, prior_diagonal, AssembledBlocks, PrecisionBlocks};
pub use error::{PosteriorError, Result};
pub use joint::JointPosterior;
pub use log_det::{batched_diagonal, gaussian_entropy, log_determinant};
pub use sampler::{sample, sample_n, DeviceNoise, NoiseSource, RngNoise};
pub use smoothing::{SmoothingConfig, SmoothingPosterior};
pub use triangular::{backward_solve, forward_solve, multiply_transpose, posterior_mean};

pub(crate) use error::{check_dims, check_nonzero};
