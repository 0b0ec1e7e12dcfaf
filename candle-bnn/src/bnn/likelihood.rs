//! Gaussian observation model for regression targets.

use candle_core::Tensor;

use crate::error::{BnnError, Result};

/// Observation variance of the likelihood used by the ELBO
pub const UNIT_VARIANCE: f64 = 1.0;

/// Fixed-variance Gaussian likelihood: y ~ N(ŷ, σ²) with known σ².
///
/// ```text
/// log p(y | ŷ) = Σ -0.5 * [(y - ŷ)² / σ² + ln(2πσ²)]
/// ```
pub struct FixedGaussianLikelihood {
    inv_2var: f64,
    log_2pi_var: f64,
}

impl FixedGaussianLikelihood {
    pub fn new(variance: f64) -> Self {
        Self {
            inv_2var: 0.5 / variance,
            log_2pi_var: (2.0 * std::f64::consts::PI * variance).ln(),
        }
    }

    /// Unit-variance observation model
    pub fn unit() -> Self {
        Self::new(UNIT_VARIANCE)
    }

    /// Log-likelihood summed over every element
    ///
    /// # Arguments
    /// * `y` - observations, same shape as `y_hat`
    /// * `y_hat` - predicted means
    ///
    /// # Returns
    /// Scalar tensor
    pub fn log_likelihood(&self, y: &Tensor, y_hat: &Tensor) -> Result<Tensor> {
        if y.dims() != y_hat.dims() {
            return Err(BnnError::ShapeMismatch {
                what: "targets",
                expected: y_hat.dims().to_vec(),
                got: y.dims().to_vec(),
            });
        }
        let diff_sq = (y - y_hat)?.sqr()?;
        let log_prob = ((diff_sq * (-self.inv_2var))? + (-0.5 * self.log_2pi_var))?;
        Ok(log_prob.sum_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_perfect_fit() -> Result<()> {
        let device = Device::Cpu;
        let y = Tensor::from_vec(vec![0.0f32, 1.0, 2.0], (3, 1), &device)?;

        let llik: f32 = FixedGaussianLikelihood::unit()
            .log_likelihood(&y, &y)?
            .to_scalar()?;

        // -0.5 * 3 * ln(2π)
        let expected = -1.5 * (2.0 * std::f32::consts::PI).ln();
        approx::assert_abs_diff_eq!(llik, expected, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_residual() -> Result<()> {
        let device = Device::Cpu;
        let y = Tensor::from_vec(vec![1.0f32, -1.0], (2, 1), &device)?;
        let y_hat = Tensor::zeros((2, 1), candle_core::DType::F32, &device)?;

        let llik: f32 = FixedGaussianLikelihood::unit()
            .log_likelihood(&y, &y_hat)?
            .to_scalar()?;

        let expected = -0.5 * 2.0 - (2.0 * std::f32::consts::PI).ln();
        approx::assert_abs_diff_eq!(llik, expected, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch() -> Result<()> {
        let device = Device::Cpu;
        let y = Tensor::zeros(3, candle_core::DType::F32, &device)?;
        let y_hat = Tensor::zeros((3, 1), candle_core::DType::F32, &device)?;

        let err = FixedGaussianLikelihood::unit()
            .log_likelihood(&y, &y_hat)
            .unwrap_err();
        assert!(matches!(err, BnnError::ShapeMismatch { what: "targets", .. }));
        Ok(())
    }
}
