use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::bnn::{BayesianNetwork, DEFAULT_NUM_SAMPLES};

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// Monte Carlo passes per ELBO evaluation
    pub num_samples: usize,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-2,
            batch_size: 64,
            num_epochs: 500,
            num_samples: DEFAULT_NUM_SAMPLES,
            verbose: false,
            show_progress: true,
        }
    }
}

/// Shuffle rows into minibatches of at most `batch_size`
fn shuffled_minibatches<R: Rng + ?Sized>(nrows: usize, batch_size: usize, rng: &mut R) -> Vec<Vec<u32>> {
    let mut rows: Vec<u32> = (0..nrows as u32).collect();
    rows.shuffle(rng);
    rows.chunks(batch_size.max(1)).map(|c| c.to_vec()).collect()
}

/// Device holding the network's variational parameters
fn network_device(network: &BayesianNetwork) -> anyhow::Result<Device> {
    network
        .parameters()
        .first()
        .map(|(_, t)| t.device().clone())
        .ok_or_else(|| anyhow::anyhow!("network has no parameters"))
}

/// Train a network by minimizing the negative ELBO with AdamW
///
/// * `network` - network whose variational parameters live in `variable_map`
/// * `variable_map` - every trainable variable of `network`
/// * `x_nd` - inputs (n x input_size)
/// * `y_nk` - targets (n x output_size)
/// * `train_config` - training configuration
/// * `rng` - random source for minibatch shuffling and weight sampling
///
/// `x_nd` and `y_nk` are moved to the device of the network's parameters.
/// Returns the average loss per epoch.
pub fn fit<R: Rng + ?Sized>(
    network: &BayesianNetwork,
    variable_map: &VarMap,
    x_nd: &Tensor,
    y_nk: &Tensor,
    train_config: &TrainConfig,
    rng: &mut R,
) -> anyhow::Result<Vec<f32>> {
    let nrows = x_nd.dim(0)?;
    if y_nk.dim(0)? != nrows {
        anyhow::bail!("X and Y must have same number of rows");
    }
    if nrows == 0 {
        anyhow::bail!("no training rows");
    }

    let device = &network_device(network)?;
    let x_nd = x_nd.to_device(device)?;
    let y_nk = y_nk.to_device(device)?;

    let mut adam = AdamW::new_lr(
        variable_map.all_vars(),
        train_config.learning_rate.into(),
    )?;

    let pb = ProgressBar::new(train_config.num_epochs as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    info!(
        "Training for {} epochs on {} samples, {} Monte Carlo passes",
        train_config.num_epochs, nrows, train_config.num_samples
    );

    let mut loss_trace = vec![];

    for epoch in 0..train_config.num_epochs {
        let minibatches = shuffled_minibatches(nrows, train_config.batch_size, rng);
        let num_minibatch = minibatches.len();
        let mut loss_tot = 0f32;

        for rows in minibatches {
            let len = rows.len();
            let idx = Tensor::from_vec(rows, len, device)?;
            let x = x_nd.index_select(&idx, 0)?;
            let y = y_nk.index_select(&idx, 0)?;

            let loss = network.elbo_loss(&x, &y, train_config.num_samples, rng)?;
            adam.backward_step(&loss)?;
            loss_tot += loss.to_scalar::<f32>()?;
        }

        pb.inc(1);
        let loss_avg = loss_tot / num_minibatch as f32;
        loss_trace.push(loss_avg);

        if train_config.verbose {
            info!("[{}] loss: {}", epoch + 1, loss_avg);
        }
    }
    pb.finish_and_clear();
    Ok(loss_trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bnn::BnnConfig;
    use candle_core::DType;
    use candle_nn::VarBuilder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_minibatches_cover_rows() {
        let mut rng = StdRng::seed_from_u64(0);
        let batches = shuffled_minibatches(10, 4, &mut rng);
        assert_eq!(
            batches.iter().map(|b| b.len()).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        let mut rows: Vec<u32> = batches.into_iter().flatten().collect();
        rows.sort();
        assert_eq!(rows, (0..10).collect::<Vec<u32>>());
    }

    #[test]
    fn test_fit_reduces_loss() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let n = 64;

        // y = 2 * x[:, 0] - x[:, 1] + noise
        let x = Tensor::randn(0f32, 1f32, (n, 3), &device)?;
        let noise = Tensor::randn(0f32, 0.1f32, (n, 1), &device)?;
        let y = ((x.narrow(1, 0, 1)? * 2.0)? - x.narrow(1, 1, 1)?)?.add(&noise)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let net = BayesianNetwork::new(vb, &BnnConfig::new(3, 8, 1, 1))?;

        let config = TrainConfig {
            learning_rate: 1e-2,
            batch_size: 32,
            num_epochs: 60,
            num_samples: 3,
            show_progress: false,
            ..Default::default()
        };

        let mut rng = StdRng::seed_from_u64(7);
        let trace = fit(&net, &varmap, &x, &y, &config, &mut rng)?;

        assert_eq!(trace.len(), 60);
        assert!(trace.iter().all(|l| l.is_finite()));
        let head: f32 = trace[..5].iter().sum::<f32>() / 5.0;
        let tail: f32 = trace[55..].iter().sum::<f32>() / 5.0;
        assert!(tail < head, "loss went from {} to {}", head, tail);
        Ok(())
    }

    #[test]
    fn test_fit_row_mismatch() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let net = BayesianNetwork::new(vb, &BnnConfig::new(3, 4, 1, 1))?;

        let x = Tensor::zeros((8, 3), DType::F32, &device)?;
        let y = Tensor::zeros((7, 1), DType::F32, &device)?;
        let mut rng = StdRng::seed_from_u64(0);

        assert!(fit(&net, &varmap, &x, &y, &TrainConfig::default(), &mut rng).is_err());
        Ok(())
    }

    #[test]
    fn test_fit_empty_rows() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let net = BayesianNetwork::new(vb, &BnnConfig::new(4, 4, 1, 1))?;

        let x = Tensor::zeros((0, 4), DType::F32, &device)?;
        let y = Tensor::zeros((0, 1), DType::F32, &device)?;
        let config = TrainConfig {
            num_epochs: 2,
            show_progress: false,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);

        let err = fit(&net, &varmap, &x, &y, &config, &mut rng).unwrap_err();
        assert!(err.to_string().contains("no training rows"));
        Ok(())
    }

    #[test]
    fn test_data_follows_network_device() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let net = BayesianNetwork::new(vb, &BnnConfig::new(2, 3, 1, 1))?;

        assert!(network_device(&net)?.is_cpu());

        let x = Tensor::randn(0f32, 1f32, (6, 2), &Device::Cpu)?;
        let y = Tensor::zeros((6, 1), DType::F32, &Device::Cpu)?;
        let config = TrainConfig {
            num_epochs: 1,
            batch_size: 4,
            show_progress: false,
            ..Default::default()
        };
        let trace = fit(&net, &varmap, &x, &y, &config, &mut StdRng::seed_from_u64(3))?;
        assert_eq!(trace.len(), 1);
        assert!(trace[0].is_finite());
        Ok(())
    }
}
