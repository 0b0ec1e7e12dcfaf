use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::Args;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

use crate::bnn::{BayesianNetwork, BnnConfig, KlDivergence, DEFAULT_NUM_SAMPLES};
use crate::io::{read_matrix, write_matrix, write_vector};
use crate::train::{fit, TrainConfig};

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(short, long, help = "Input matrix (n x p), tsv/csv, optionally .gz")]
    pub x: PathBuf,

    #[arg(short, long, help = "Target matrix (n x k), tsv/csv, optionally .gz")]
    pub y: PathBuf,

    #[arg(short, long, help = "Output file prefix")]
    pub out: PathBuf,

    #[arg(long, default_value = "0", help = "Header lines to skip in X and Y")]
    pub skip: usize,

    #[arg(long, default_value = "32")]
    pub hidden_size: usize,

    #[arg(long, default_value = "2", help = "Number of hidden layers")]
    pub num_layers: usize,

    #[arg(long, default_value = "500")]
    pub epochs: usize,

    #[arg(long, default_value = "0.01")]
    pub learning_rate: f32,

    #[arg(long, default_value = "64")]
    pub batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_NUM_SAMPLES, help = "Monte Carlo passes per ELBO")]
    pub num_samples: usize,

    #[arg(long, default_value = "100", help = "Monte Carlo passes for prediction")]
    pub predict_samples: usize,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(long, help = "Use CUDA/Metal device 0 if built with the feature")]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

fn output_path(prefix: &Path, suffix: &str) -> Result<String> {
    let s = prefix
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid output path"))?;
    Ok(format!("{}.{}", s, suffix))
}

fn input_path(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| anyhow::anyhow!("Invalid path"))
}

/// CUDA or Metal device 0 when requested and compiled in, otherwise CPU
fn select_device(gpu: bool) -> Device {
    if !gpu {
        return Device::Cpu;
    }
    #[cfg(feature = "cuda")]
    if let Ok(device) = Device::new_cuda(0) {
        return device;
    }
    #[cfg(feature = "metal")]
    if let Ok(device) = Device::new_metal(0) {
        return device;
    }
    log::warn!("no GPU backend available, falling back to CPU");
    Device::Cpu
}

pub fn run(args: &FitArgs) -> Result<()> {
    let device = select_device(args.gpu);
    info!("Using device: {:?}", device);
    let dtype = DType::F32;

    info!("Loading X from {:?}", args.x);
    let x = read_matrix(input_path(&args.x)?, args.skip, &device)?;
    info!("Loading Y from {:?}", args.y);
    let y = read_matrix(input_path(&args.y)?, args.skip, &device)?;

    let (n, p) = x.dims2()?;
    let (ny, k) = y.dims2()?;
    info!("X: {} x {}, Y: {} x {}", n, p, ny, k);
    if n != ny {
        anyhow::bail!("X and Y must have same number of rows");
    }

    let config = BnnConfig::new(p, args.hidden_size, k, args.num_layers);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, dtype, &device);
    let network = BayesianNetwork::new(vb, &config)?;

    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        num_samples: args.num_samples,
        verbose: args.verbose,
        show_progress: true,
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let loss_trace = fit(&network, &varmap, &x, &y, &train_config, &mut rng)?;

    let kl = network.kl_divergence()?.to_scalar::<f32>()?;
    info!(
        "final loss = {:.4}, KL = {:.4}",
        loss_trace.last().copied().unwrap_or(f32::NAN),
        kl
    );

    let summary = network.predictive(&x, args.predict_samples, &mut rng)?;

    let mean_file = output_path(&args.out, "pred_mean.tsv")?;
    write_matrix(&summary.mean, &mean_file)?;
    info!("Saved predictive mean to {}", mean_file);

    let std_file = output_path(&args.out, "pred_std.tsv")?;
    write_matrix(&summary.std, &std_file)?;
    info!("Saved predictive std to {}", std_file);

    let loss_file = output_path(&args.out, "loss.tsv")?;
    write_vector(&loss_trace, &loss_file)?;

    let param_file = output_path(&args.out, "safetensors")?;
    varmap.save(&param_file)?;
    info!("Saved variational parameters to {}", param_file);

    Ok(())
}
