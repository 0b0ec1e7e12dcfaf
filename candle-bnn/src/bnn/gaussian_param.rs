use candle_core::{DType, Device, Shape, Tensor};
use candle_nn::{Init, VarBuilder};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::Result;

/// Initial value of ln(σ); exp(-5) ≈ 0.0067, near-deterministic weights.
pub const INIT_LN_STD: f64 = -5.0;

/// Draw ε ~ N(0, I) of the given shape from an explicit random source.
///
/// The result is a constant leaf tensor: no gradient flows into it.
/// F64 draws at full precision; every other dtype is drawn as f32 and cast.
/// The draw happens on the host and is copied to `device`.
pub fn standard_normal<S, R>(shape: S, dtype: DType, device: &Device, rng: &mut R) -> Result<Tensor>
where
    S: Into<Shape>,
    R: Rng + ?Sized,
{
    let shape = shape.into();
    let n = shape.elem_count();
    let epsilon = match dtype {
        DType::F64 => {
            let data: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
            Tensor::from_vec(data, shape, device)?
        }
        _ => {
            let data: Vec<f32> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
            Tensor::from_vec(data, shape, device)?.to_dtype(dtype)?
        }
    };
    Ok(epsilon)
}

/// Gaussian parameter pair q(θ) = N(μ, σ²I)
///
/// Mean-field approximation with diagonal covariance.
/// Parameters are stored as mean μ and log standard deviation ln(σ).
#[derive(Clone, Debug)]
pub struct GaussianParam {
    /// Variational mean μ
    mean: Tensor,
    /// Log standard deviation ln(σ), same shape as `mean`
    ln_std: Tensor,
}

impl GaussianParam {
    /// Create a new Gaussian parameter pair.
    ///
    /// # Arguments
    /// * `vb` - VarBuilder for creating trainable parameters
    /// * `shape` - natural shape of the parameter, e.g. (out, in)
    /// * `mean_init` - initializer for μ
    ///
    /// # Returns
    /// GaussianParam with `ln_std = INIT_LN_STD` everywhere
    pub fn new<S: Into<Shape>>(vb: VarBuilder, shape: S, mean_init: Init) -> Result<Self> {
        let shape = shape.into();
        let mean = vb.get_with_hints(shape.clone(), "mean", mean_init)?;
        let ln_std = vb.get_with_hints(shape, "ln_std", Init::Const(INIT_LN_STD))?;
        Ok(Self { mean, ln_std })
    }

    /// Get the variational mean μ.
    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// Get the log standard deviation ln(σ).
    pub fn ln_std(&self) -> &Tensor {
        &self.ln_std
    }

    /// Get the variational standard deviation σ = exp(ln_std).
    pub fn std(&self) -> Result<Tensor> {
        Ok(self.ln_std.exp()?)
    }

    /// Get the variational variance σ² = exp(2 * ln_std).
    pub fn var(&self) -> Result<Tensor> {
        Ok((&self.ln_std * 2.0)?.exp()?)
    }

    /// Sample using reparameterization: θ = μ + σ * ε where ε ~ N(0, I)
    ///
    /// ε is drawn fresh from `rng` on every call and then dropped, so the
    /// sample stays differentiable w.r.t. μ (∂θ/∂μ = 1) and ln(σ)
    /// (∂θ/∂ln σ = ε σ).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Tensor> {
        let epsilon = standard_normal(
            self.mean.shape().clone(),
            self.mean.dtype(),
            self.mean.device(),
            rng,
        )?;
        let noise = (self.std()? * epsilon)?;
        Ok((&self.mean + noise)?)
    }

    /// KL(N(μ, σ²) || N(0, σ²)) summed over all elements
    ///
    /// The prior shares the posterior's σ and only pins the mean at zero,
    /// so each element contributes 0.5 * (μ/σ)² and nothing pushes σ down.
    pub fn kl_to_zero_mean(&self) -> Result<Tensor> {
        let kl = (self.mean.sqr()? / self.var()?)?.sum_all()?;
        Ok((kl * 0.5)?)
    }

    /// The two trainable tensors, named as in the var map
    pub fn parameters(&self, prefix: &str) -> Vec<(String, Tensor)> {
        vec![
            (format!("{}.mean", prefix), self.mean.clone()),
            (format!("{}.ln_std", prefix), self.ln_std.clone()),
        ]
    }
}
