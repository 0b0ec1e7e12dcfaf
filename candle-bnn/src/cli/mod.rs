pub mod fit;

use clap::{Parser, Subcommand};

pub use fit::FitArgs;

#[derive(Parser)]
#[command(name = "candle-bnn")]
#[command(about = "Bayesian neural network regression by variational inference")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit a Bayesian network and report its posterior predictive
    Fit(FitArgs),
}
