use candle_core::Tensor;
use candle_nn::VarBuilder;
use log::debug;
use rand::Rng;

use super::gaussian_param::GaussianParam;
use super::traits::{KlDivergence, StochasticModule};
use crate::error::{check_positive, BnnError, Result};

///////////////////////////////////////////////////
// Linear module with Gaussian weights and biases //
///////////////////////////////////////////////////

/// Affine layer `y = x W^T + b` with W ~ N(μ_W, σ_W²), b ~ N(μ_b, σ_b²)
#[derive(Clone, Debug)]
pub struct VariationalLinear {
    in_features: usize,
    out_features: usize,
    weight: GaussianParam, // out x in
    bias: GaussianParam,   // out
}

impl VariationalLinear {
    /// Create a new variational linear layer.
    ///
    /// Weight means follow Kaiming-normal (fan-in, ReLU) initialization,
    /// bias means start at zero, and every ln(σ) starts at -5.
    ///
    /// # Arguments
    /// * `vb` - VarBuilder for creating trainable parameters
    /// * `in_features` - input width
    /// * `out_features` - output width
    pub fn new(vb: VarBuilder, in_features: usize, out_features: usize) -> Result<Self> {
        check_positive("in_features", in_features)?;
        check_positive("out_features", out_features)?;

        let weight = GaussianParam::new(
            vb.pp("weight"),
            (out_features, in_features),
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = GaussianParam::new(vb.pp("bias"), out_features, candle_nn::init::ZERO)?;

        debug!("variational linear {} -> {}", in_features, out_features);

        Ok(Self {
            in_features,
            out_features,
            weight,
            bias,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Variational distribution over the weight matrix (out x in)
    pub fn weight(&self) -> &GaussianParam {
        &self.weight
    }

    /// Variational distribution over the bias vector (out)
    pub fn bias(&self) -> &GaussianParam {
        &self.bias
    }

    /// One reparameterized draw of the weight matrix, shape (out, in)
    pub fn sample_weight<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Tensor> {
        self.weight.sample(rng)
    }

    /// One reparameterized draw of the bias vector, shape (out,)
    pub fn sample_bias<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Tensor> {
        self.bias.sample(rng)
    }

    /// The four trainable tensors, named relative to this layer's prefix
    pub fn parameters(&self) -> Vec<(String, Tensor)> {
        let mut ret = self.weight.parameters("weight");
        ret.extend(self.bias.parameters("bias"));
        ret
    }

    fn check_input(&self, x: &Tensor) -> Result<()> {
        match x.dims().last() {
            Some(&d) if d == self.in_features => Ok(()),
            _ => Err(BnnError::ShapeMismatch {
                what: "input features",
                expected: vec![self.in_features],
                got: x.dims().to_vec(),
            }),
        }
    }

    /// x @ w^T + b for inputs of rank 1 to 4
    fn affine(x: &Tensor, w_dk: &Tensor, b_d: &Tensor) -> Result<Tensor> {
        if x.rank() == 1 {
            let h = Self::affine(&x.unsqueeze(0)?, w_dk, b_d)?;
            return Ok(h.squeeze(0)?);
        }

        let w_kd = match *x.dims() {
            [b1, b2, _, _] => w_dk.broadcast_left((b1, b2))?.t()?,
            [bsize, _, _] => w_dk.broadcast_left(bsize)?.t()?,
            _ => w_dk.t()?,
        };

        Ok(x.matmul(&w_kd)?.broadcast_add(b_d)?)
    }
}

impl StochasticModule for VariationalLinear {
    /// Samples a fresh weight and bias, so repeated calls differ
    fn forward<R: Rng + ?Sized>(&self, x: &Tensor, rng: &mut R) -> Result<Tensor> {
        self.check_input(x)?;
        let w = self.sample_weight(rng)?;
        let b = self.sample_bias(rng)?;
        Self::affine(x, &w, &b)
    }

    fn forward_mean(&self, x: &Tensor) -> Result<Tensor> {
        self.check_input(x)?;
        Self::affine(x, self.weight.mean(), self.bias.mean())
    }
}

impl KlDivergence for VariationalLinear {
    /// Σ 0.5 (μ/σ)² over weights and biases; the prior is N(0, σ²) with
    /// the posterior's own σ
    fn kl_divergence(&self) -> Result<Tensor> {
        let kl_weight = self.weight.kl_to_zero_mean()?;
        let kl_bias = self.bias.kl_to_zero_mean()?;
        Ok((kl_weight + kl_bias)?)
    }
}
