use candle_core::Tensor;
use rand::Rng;

use super::traits::StochasticModule;
use crate::error::{check_positive, Result};

/// Monte Carlo summary of the posterior predictive distribution
pub struct PredictiveSummary {
    /// Elementwise mean over samples, same shape as one forward pass
    pub mean: Tensor,
    /// Elementwise (population) standard deviation over samples
    pub std: Tensor,
    pub num_samples: usize,
}

impl PredictiveSummary {
    /// Run `num_samples` stochastic passes and summarize them
    ///
    /// # Arguments
    /// * `model` - stochastic model
    /// * `x` - inputs
    /// * `num_samples` - number of forward passes
    /// * `rng` - random source
    pub fn estimate<M, R>(model: &M, x: &Tensor, num_samples: usize, rng: &mut R) -> Result<Self>
    where
        M: StochasticModule,
        R: Rng + ?Sized,
    {
        check_positive("num_samples", num_samples)?;

        let mut outputs = Vec::with_capacity(num_samples);
        for _ in 0..num_samples {
            // no gradients needed for prediction
            outputs.push(model.forward(x, rng)?.detach());
        }

        let stacked = Tensor::stack(&outputs, 0)?;
        let mean = stacked.mean(0)?;
        let std = stacked
            .broadcast_sub(&mean.unsqueeze(0)?)?
            .sqr()?
            .mean(0)?
            .sqrt()?;

        Ok(Self {
            mean,
            std,
            num_samples,
        })
    }
}
