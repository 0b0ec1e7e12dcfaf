use candle_core::Tensor;
use candle_nn::VarBuilder;
use log::debug;
use rand::Rng;

use super::elbo::{self, ElboConfig, ElboTerms};
use super::layer_kind::LayerKind;
use super::predictive::PredictiveSummary;
use super::traits::{KlDivergence, StochasticModule};
use super::variational_linear::VariationalLinear;
use crate::error::{check_positive, Result};

/// Architecture of a `BayesianNetwork`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BnnConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    /// number of hidden layers (the output layer comes on top)
    pub num_layers: usize,
}

impl BnnConfig {
    pub fn new(input_size: usize, hidden_size: usize, output_size: usize, num_layers: usize) -> Self {
        Self {
            input_size,
            hidden_size,
            output_size,
            num_layers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("input_size", self.input_size)?;
        check_positive("hidden_size", self.hidden_size)?;
        check_positive("output_size", self.output_size)?;
        check_positive("num_layers", self.num_layers)?;
        Ok(())
    }
}

/// Feed-forward network of variational layers
///
/// `num_layers` hidden layers, each followed by ReLU, and one output layer
/// without activation. Every stochastic forward pass resamples all weights.
#[derive(Clone, Debug)]
pub struct BayesianNetwork {
    config: BnnConfig,
    hidden: Vec<LayerKind>,
    output: LayerKind,
}

impl BayesianNetwork {
    /// Build a network; parameters are registered under `hidden.<i>` and
    /// `output` in the var map behind `vb`.
    pub fn new(vb: VarBuilder, config: &BnnConfig) -> Result<Self> {
        config.validate()?;

        let mut hidden = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let d_in = if i == 0 {
                config.input_size
            } else {
                config.hidden_size
            };
            let layer = VariationalLinear::new(vb.pp(format!("hidden.{}", i)), d_in, config.hidden_size)?;
            hidden.push(layer.into());
        }

        let output = VariationalLinear::new(vb.pp("output"), config.hidden_size, config.output_size)?.into();

        debug!(
            "bayesian network: {} -> {} x {} -> {}",
            config.input_size, config.hidden_size, config.num_layers, config.output_size
        );

        Ok(Self {
            config: config.clone(),
            hidden,
            output,
        })
    }

    pub fn build(
        vb: VarBuilder,
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        num_layers: usize,
    ) -> Result<Self> {
        Self::new(
            vb,
            &BnnConfig::new(input_size, hidden_size, output_size, num_layers),
        )
    }

    pub fn config(&self) -> &BnnConfig {
        &self.config
    }

    /// Hidden layers first, then the output layer
    pub fn layers(&self) -> impl Iterator<Item = &LayerKind> {
        self.hidden.iter().chain(std::iter::once(&self.output))
    }

    /// Sum of every layer's KL divergence
    pub fn total_kl_divergence(&self) -> Result<Tensor> {
        let mut kl = self.output.kl_divergence()?;
        for layer in self.hidden.iter() {
            kl = (kl + layer.kl_divergence()?)?;
        }
        Ok(kl)
    }

    /// ELBO pieces on a batch (see `elbo::elbo_terms`)
    pub fn elbo_terms<R: Rng + ?Sized>(
        &self,
        x: &Tensor,
        y: &Tensor,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<ElboTerms> {
        elbo::elbo_terms(self, x, y, num_samples, rng)
    }

    /// Negative ELBO averaged over `num_samples` stochastic passes
    ///
    /// # Arguments
    /// * `x` - inputs (n x input_size)
    /// * `y` - targets (n x output_size)
    /// * `num_samples` - Monte Carlo passes, `DEFAULT_NUM_SAMPLES` is 10
    /// * `rng` - random source
    ///
    /// # Returns
    /// Scalar loss to minimize
    pub fn elbo_loss<R: Rng + ?Sized>(
        &self,
        x: &Tensor,
        y: &Tensor,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<Tensor> {
        elbo::elbo_loss(self, x, y, num_samples, rng)
    }

    pub fn elbo_loss_with<R: Rng + ?Sized>(
        &self,
        x: &Tensor,
        y: &Tensor,
        config: &ElboConfig,
        rng: &mut R,
    ) -> Result<Tensor> {
        self.elbo_loss(x, y, config.num_samples, rng)
    }

    /// Posterior predictive mean and standard deviation
    pub fn predictive<R: Rng + ?Sized>(
        &self,
        x: &Tensor,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<PredictiveSummary> {
        PredictiveSummary::estimate(self, x, num_samples, rng)
    }

    /// Every trainable tensor, named as in the var map
    pub fn parameters(&self) -> Vec<(String, Tensor)> {
        let mut ret = vec![];
        for (i, layer) in self.hidden.iter().enumerate() {
            ret.extend(
                layer
                    .parameters()
                    .into_iter()
                    .map(|(name, t)| (format!("hidden.{}.{}", i, name), t)),
            );
        }
        ret.extend(
            self.output
                .parameters()
                .into_iter()
                .map(|(name, t)| (format!("output.{}", name), t)),
        );
        ret
    }
}

impl StochasticModule for BayesianNetwork {
    fn forward<R: Rng + ?Sized>(&self, x: &Tensor, rng: &mut R) -> Result<Tensor> {
        let mut h = x.clone();
        for layer in self.hidden.iter() {
            h = layer.forward(&h, rng)?.relu()?;
        }
        self.output.forward(&h, rng)
    }

    fn forward_mean(&self, x: &Tensor) -> Result<Tensor> {
        let mut h = x.clone();
        for layer in self.hidden.iter() {
            h = layer.forward_mean(&h)?.relu()?;
        }
        self.output.forward_mean(&h)
    }
}

impl KlDivergence for BayesianNetwork {
    fn kl_divergence(&self) -> Result<Tensor> {
        self.total_kl_divergence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BnnError;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn build(varmap: &VarMap, config: &BnnConfig) -> Result<BayesianNetwork> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        BayesianNetwork::new(vb, config)
    }

    fn set_ln_std(varmap: &VarMap, value: f64) -> Result<()> {
        for (name, var) in varmap.data().lock().unwrap().iter() {
            if name.ends_with(".ln_std") {
                var.set(&(var.as_tensor().ones_like()? * value)?)?;
            }
        }
        Ok(())
    }

    fn std_dev(xs: &[f32]) -> f32 {
        let n = xs.len() as f32;
        let mean = xs.iter().sum::<f32>() / n;
        (xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n).sqrt()
    }

    #[test]
    fn test_layer_widths() -> Result<()> {
        let varmap = VarMap::new();
        let net = build(&varmap, &BnnConfig::new(4, 8, 2, 3))?;

        let dims: Vec<(usize, usize)> = net
            .layers()
            .map(|l| (l.in_features(), l.out_features()))
            .collect();
        assert_eq!(dims, vec![(4, 8), (8, 8), (8, 8), (8, 2)]);
        assert_eq!(varmap.all_vars().len(), 4 * 4);
        assert_eq!(net.parameters().len(), 4 * 4);
        Ok(())
    }

    #[test]
    fn test_invalid_config() {
        let varmap = VarMap::new();
        for (config, field) in [
            (BnnConfig::new(0, 8, 1, 2), "input_size"),
            (BnnConfig::new(4, 0, 1, 2), "hidden_size"),
            (BnnConfig::new(4, 8, 0, 2), "output_size"),
            (BnnConfig::new(4, 8, 1, 0), "num_layers"),
        ] {
            let err = build(&varmap, &config).unwrap_err();
            assert!(matches!(err, BnnError::InvalidDimension { name, .. } if name == field));
        }
        assert!(varmap.all_vars().is_empty());
    }

    #[test]
    fn test_total_kl_is_sum_of_layers() -> Result<()> {
        let varmap = VarMap::new();
        let net = build(&varmap, &BnnConfig::new(3, 5, 2, 3))?;

        let mut manual = 0f32;
        for layer in net.layers() {
            manual += layer.kl_divergence()?.to_scalar::<f32>()?;
        }
        let total: f32 = net.total_kl_divergence()?.to_scalar()?;
        approx::assert_relative_eq!(total, manual, max_relative = 1e-5);
        assert!(total > 0.0);
        Ok(())
    }

    #[test]
    fn test_forward_stochastic() -> Result<()> {
        let varmap = VarMap::new();
        let net = build(&varmap, &BnnConfig::new(4, 8, 1, 2))?;
        set_ln_std(&varmap, -1.0)?;
        let x = Tensor::randn(0f32, 1f32, (10, 4), &Device::Cpu)?;

        let mut rng = rand::rng();
        let y1 = net.forward(&x, &mut rng)?;
        let y2 = net.forward(&x, &mut rng)?;
        let diff: f32 = (&y1 - &y2)?.abs()?.sum_all()?.to_scalar()?;
        assert!(diff > 0.0);

        let y1 = net.forward(&x, &mut StdRng::seed_from_u64(3))?;
        let y2 = net.forward(&x, &mut StdRng::seed_from_u64(3))?;
        let diff: f32 = (&y1 - &y2)?.abs()?.sum_all()?.to_scalar()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn test_forward_shape_mismatch() -> Result<()> {
        let varmap = VarMap::new();
        let net = build(&varmap, &BnnConfig::new(4, 8, 1, 2))?;
        let x = Tensor::zeros((6, 5), DType::F32, &Device::Cpu)?;

        let err = net.forward(&x, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, BnnError::ShapeMismatch { .. }));
        Ok(())
    }

    #[test]
    fn test_elbo_loss_scalar() -> Result<()> {
        let varmap = VarMap::new();
        let net = build(&varmap, &BnnConfig::new(4, 8, 1, 2))?;
        let x = Tensor::randn(0f32, 1f32, (16, 4), &Device::Cpu)?;
        let y = Tensor::randn(0f32, 1f32, (16, 1), &Device::Cpu)?;
        let mut rng = StdRng::seed_from_u64(5);

        let loss = net.elbo_loss_with(&x, &y, &ElboConfig::default(), &mut rng)?;
        assert!(loss.dims().is_empty());
        assert!(loss.to_scalar::<f32>()?.is_finite());

        let terms = net.elbo_terms(&x, &y, 3, &mut rng)?;
        let elbo: f32 = terms.elbo.to_scalar()?;
        let llik: f32 = terms.log_likelihood.to_scalar()?;
        let kl: f32 = terms.kl.to_scalar()?;
        approx::assert_relative_eq!(elbo, llik - kl / 16.0, max_relative = 1e-4);
        Ok(())
    }

    #[test]
    fn test_elbo_batch_mismatch() -> Result<()> {
        let varmap = VarMap::new();
        let net = build(&varmap, &BnnConfig::new(4, 8, 1, 2))?;
        let x = Tensor::zeros((16, 4), DType::F32, &Device::Cpu)?;
        let y = Tensor::zeros((15, 1), DType::F32, &Device::Cpu)?;
        let mut rng = StdRng::seed_from_u64(0);

        let err = net.elbo_loss(&x, &y, 5, &mut rng).unwrap_err();
        assert!(matches!(err, BnnError::ShapeMismatch { what: "batch size", .. }));

        let y = Tensor::zeros((16, 1), DType::F32, &Device::Cpu)?;
        let err = net.elbo_loss(&x, &y, 0, &mut rng).unwrap_err();
        assert!(matches!(err, BnnError::InvalidDimension { name: "num_samples", .. }));
        Ok(())
    }

    #[test]
    fn test_more_samples_less_spread() -> Result<()> {
        let varmap = VarMap::new();
        let net = build(&varmap, &BnnConfig::new(4, 8, 1, 2))?;
        set_ln_std(&varmap, -1.0)?;
        let x = Tensor::randn(0f32, 1f32, (16, 4), &Device::Cpu)?;
        let y = Tensor::randn(0f32, 1f32, (16, 1), &Device::Cpu)?;
        let mut rng = StdRng::seed_from_u64(17);

        let mut spread = |num_samples: usize| -> Result<f32> {
            let mut losses = vec![];
            for _ in 0..100 {
                losses.push(net.elbo_loss(&x, &y, num_samples, &mut rng)?.to_scalar::<f32>()?);
            }
            Ok(std_dev(&losses))
        };

        let sd_1 = spread(1)?;
        let sd_50 = spread(50)?;
        assert!(sd_50 < sd_1, "sd(S=50) = {} >= sd(S=1) = {}", sd_50, sd_1);
        Ok(())
    }

    #[test]
    fn test_predictive_summary() -> Result<()> {
        let varmap = VarMap::new();
        let net = build(&varmap, &BnnConfig::new(4, 8, 2, 1))?;
        let x = Tensor::randn(0f32, 1f32, (5, 4), &Device::Cpu)?;

        let summary = net.predictive(&x, 20, &mut StdRng::seed_from_u64(9))?;
        assert_eq!(summary.mean.dims(), &[5, 2]);
        assert_eq!(summary.std.dims(), &[5, 2]);
        assert!(summary
            .std
            .flatten_all()?
            .to_vec1::<f32>()?
            .iter()
            .all(|s| *s >= 0.0));

        let single = net.predictive(&x, 1, &mut StdRng::seed_from_u64(9))?;
        let zero: f32 = single.std.sum_all()?.to_scalar()?;
        assert_eq!(zero, 0.0);
        Ok(())
    }

    #[test]
    fn test_forward_mean_deterministic() -> Result<()> {
        let varmap = VarMap::new();
        let net = build(&varmap, &BnnConfig::new(4, 8, 1, 2))?;
        let x = Tensor::randn(0f32, 1f32, (6, 4), &Device::Cpu)?;

        let a = net.forward_mean(&x)?;
        let b = net.forward_mean(&x)?;
        let diff: f32 = (a - b)?.abs()?.sum_all()?.to_scalar()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
