use thiserror::Error;

/// Error type for the Bayesian network core.
#[derive(Error, Debug)]
pub enum BnnError {
    #[error("Invalid dimension: {name} = {value}, expected a positive value")]
    InvalidDimension { name: &'static str, value: usize },

    #[error("Shape mismatch in {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, BnnError>;

/// Fail with `InvalidDimension` unless `value` is positive
pub(crate) fn check_positive(name: &'static str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(BnnError::InvalidDimension { name, value });
    }
    Ok(())
}
