use thiserror::Error;

/// Failures of the block-tridiagonal posterior engine.
///
/// None of these are transient: the engine never retries, and a
/// `NonPositiveDefinite` should be handled by dropping the offending
/// batch element (or trial) on the caller's side.
#[derive(Debug, Error)]
pub enum PosteriorError {
    #[error("shape mismatch in {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error(
        "block {step} of batch element {batch} is not positive definite \
         (pivot {pivot_index} = {pivot:e})"
    )]
    NonPositiveDefinite {
        batch: usize,
        step: usize,
        pivot_index: usize,
        pivot: f64,
    },

    #[error("invalid {what}: {value}")]
    InvalidParameter { what: &'static str, value: f64 },

    #[error("zero-sized {what}")]
    DimensionZero { what: &'static str },

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, PosteriorError>;

pub(crate) fn check_dims(what: &'static str, expected: &[usize], got: &[usize]) -> Result<()> {
    if expected != got {
        return Err(PosteriorError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}

pub(crate) fn check_nonzero(what: &'static str, dim: usize) -> Result<()> {
    if dim == 0 {
        return Err(PosteriorError::DimensionZero { what });
    }
    Ok(())
}
