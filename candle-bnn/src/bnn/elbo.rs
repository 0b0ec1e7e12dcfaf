use candle_core::Tensor;
use rand::Rng;

use super::likelihood::FixedGaussianLikelihood;
use super::traits::{KlDivergence, StochasticModule};
use crate::error::{check_positive, BnnError, Result};

/// Default number of Monte Carlo forward passes per ELBO evaluation
pub const DEFAULT_NUM_SAMPLES: usize = 10;

/// Configuration for the ELBO estimator.
#[derive(Debug, Clone)]
pub struct ElboConfig {
    /// Number of Monte Carlo samples S averaged into the prediction
    pub num_samples: usize,
}

impl Default for ElboConfig {
    fn default() -> Self {
        Self {
            num_samples: DEFAULT_NUM_SAMPLES,
        }
    }
}

impl ElboConfig {
    pub fn new(num_samples: usize) -> Self {
        Self { num_samples }
    }
}

/// The pieces of one ELBO evaluation, all scalar tensors
pub struct ElboTerms {
    /// Σ log N(y; ŷ, 1) with ŷ the Monte Carlo predictive mean
    pub log_likelihood: Tensor,
    /// Σ KL over all layers (not rescaled)
    pub kl: Tensor,
    /// log_likelihood - kl / n
    pub elbo: Tensor,
}

impl ElboTerms {
    /// Negative ELBO, the quantity to minimize
    pub fn loss(&self) -> Result<Tensor> {
        Ok(self.elbo.neg()?)
    }
}

/// Average `num_samples` independent stochastic passes elementwise.
///
/// Every pass resamples all parameters from `rng`.
pub fn monte_carlo_mean<M, R>(model: &M, x: &Tensor, num_samples: usize, rng: &mut R) -> Result<Tensor>
where
    M: StochasticModule,
    R: Rng + ?Sized,
{
    check_positive("num_samples", num_samples)?;
    let mut outputs = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        outputs.push(model.forward(x, rng)?);
    }
    Ok(Tensor::stack(&outputs, 0)?.mean(0)?)
}

/// Compute the ELBO of a stochastic model on a batch.
///
/// ```text
/// ELBO = Σ log N(y; mean_s f_s(x), 1) - KL(q || p) / n
/// ```
///
/// The KL term is computed once (it does not depend on the data), then
/// divided by the batch size `n` so it is on a per-example budget.
///
/// # Arguments
/// * `model` - stochastic model with an analytic KL term
/// * `x` - inputs, shape (n, ...)
/// * `y` - targets, same shape as the model output
/// * `num_samples` - number of Monte Carlo forward passes
/// * `rng` - random source
pub fn elbo_terms<M, R>(model: &M, x: &Tensor, y: &Tensor, num_samples: usize, rng: &mut R) -> Result<ElboTerms>
where
    M: StochasticModule + KlDivergence,
    R: Rng + ?Sized,
{
    check_positive("num_samples", num_samples)?;

    let n = match x.dims() {
        [n, _, ..] => *n,
        _ => {
            return Err(BnnError::ShapeMismatch {
                what: "batch inputs (rank >= 2)",
                expected: vec![],
                got: x.dims().to_vec(),
            })
        }
    };

    if y.dims().first() != Some(&n) {
        return Err(BnnError::ShapeMismatch {
            what: "batch size",
            expected: vec![n],
            got: y.dims().to_vec(),
        });
    }

    let kl = model.kl_divergence()?;

    let y_hat = monte_carlo_mean(model, x, num_samples, rng)?;

    let log_likelihood = FixedGaussianLikelihood::unit().log_likelihood(y, &y_hat)?;

    let elbo = (&log_likelihood - (&kl / n as f64)?)?;

    Ok(ElboTerms {
        log_likelihood,
        kl,
        elbo,
    })
}

/// Negative ELBO with reparameterization gradients flowing back to every
/// variational parameter.
pub fn elbo_loss<M, R>(model: &M, x: &Tensor, y: &Tensor, num_samples: usize, rng: &mut R) -> Result<Tensor>
where
    M: StochasticModule + KlDivergence,
    R: Rng + ?Sized,
{
    elbo_terms(model, x, y, num_samples, rng)?.loss()
}
