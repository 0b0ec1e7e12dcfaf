pub mod bnn;
pub mod cli;
pub mod error;
pub mod io;
pub mod train;

pub use candle_core;
pub use candle_nn;
