//! Bayesian feed-forward networks trained by variational inference.
//!
//! Every weight and bias is a Gaussian random variable `N(μ, exp(ln σ)²)`.
//! Forward passes draw a reparameterized sample `μ + σ ε`, so the negative
//! ELBO can be differentiated w.r.t. every μ and ln σ by candle's autodiff.
//!
//! # Key characteristics
//!
//! - Reparameterization gradients (no score function estimator)
//! - Closed-form KL against a zero-mean prior sharing the posterior's σ
//! - Monte Carlo ELBO: `Σ log N(y; mean_s f_s(x), 1) - KL / n`
//! - Randomness comes from a caller-supplied `rand::Rng`
//!
//! # Example
//!
//! ```ignore
//! use candle_bnn::bnn::{BayesianNetwork, BnnConfig};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let net = BayesianNetwork::new(vb, &BnnConfig::new(4, 8, 1, 2))?;
//! let mut optimizer = AdamW::new_lr(varmap.all_vars(), 1e-2)?;
//! let mut rng = StdRng::seed_from_u64(42);
//!
//! for _ in 0..num_iters {
//!     let loss = net.elbo_loss(&x, &y, 10, &mut rng)?;
//!     optimizer.backward_step(&loss)?;
//! }
//!
//! let summary = net.predictive(&x_new, 100, &mut rng)?;
//! ```

mod elbo;
mod gaussian_param;
mod layer_kind;
mod likelihood;
mod network;
mod predictive;
mod traits;
mod variational_linear;

pub use elbo::{elbo_loss, elbo_terms, monte_carlo_mean, ElboConfig, ElboTerms, DEFAULT_NUM_SAMPLES};
pub use gaussian_param::{standard_normal, GaussianParam, INIT_LN_STD};
pub use layer_kind::LayerKind;
pub use likelihood::{FixedGaussianLikelihood, UNIT_VARIANCE};
pub use network::{BayesianNetwork, BnnConfig};
pub use predictive::PredictiveSummary;
pub use traits::{KlDivergence, StochasticModule};
pub use variational_linear::VariationalLinear;
