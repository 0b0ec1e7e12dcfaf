use candle_core::Tensor;
use rand::Rng;

use super::traits::{KlDivergence, StochasticModule};
use super::variational_linear::VariationalLinear;
use crate::error::Result;

/// Every layer variant a `BayesianNetwork` can hold.
///
/// New posterior layers get a new arm here and implement the same
/// `StochasticModule` + `KlDivergence` capability set.
#[derive(Clone, Debug)]
pub enum LayerKind {
    VariationalLinear(VariationalLinear),
}

impl LayerKind {
    pub fn in_features(&self) -> usize {
        match self {
            Self::VariationalLinear(layer) => layer.in_features(),
        }
    }

    pub fn out_features(&self) -> usize {
        match self {
            Self::VariationalLinear(layer) => layer.out_features(),
        }
    }

    pub fn parameters(&self) -> Vec<(String, Tensor)> {
        match self {
            Self::VariationalLinear(layer) => layer.parameters(),
        }
    }
}

impl From<VariationalLinear> for LayerKind {
    fn from(layer: VariationalLinear) -> Self {
        Self::VariationalLinear(layer)
    }
}

impl StochasticModule for LayerKind {
    fn forward<R: Rng + ?Sized>(&self, x: &Tensor, rng: &mut R) -> Result<Tensor> {
        match self {
            Self::VariationalLinear(layer) => layer.forward(x, rng),
        }
    }

    fn forward_mean(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::VariationalLinear(layer) => layer.forward_mean(x),
        }
    }
}

impl KlDivergence for LayerKind {
    fn kl_divergence(&self) -> Result<Tensor> {
        match self {
            Self::VariationalLinear(layer) => layer.kl_divergence(),
        }
    }
}
