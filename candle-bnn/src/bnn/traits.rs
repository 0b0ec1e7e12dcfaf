use candle_core::Tensor;
use rand::Rng;

use crate::error::Result;

/// A module whose forward pass draws its own parameters.
///
/// Like `candle_nn::Module`, except the caller hands in the random source,
/// so two calls with identically seeded generators give identical outputs.
pub trait StochasticModule {
    /// Forward pass with freshly sampled parameters
    ///
    /// # Arguments
    /// * `x` - input tensor, trailing dimension = number of input features
    /// * `rng` - random source for the reparameterization noise
    fn forward<R: Rng + ?Sized>(&self, x: &Tensor, rng: &mut R) -> Result<Tensor>;

    /// Forward pass with every parameter fixed at its variational mean
    fn forward_mean(&self, x: &Tensor) -> Result<Tensor>;
}

/// Modules that can report a closed-form KL divergence to their prior.
pub trait KlDivergence {
    /// KL(q || p) summed over all variational parameters
    ///
    /// # Returns
    /// Scalar tensor
    fn kl_divergence(&self) -> Result<Tensor>;
}
