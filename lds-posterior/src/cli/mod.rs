pub mod simulate;

use clap::{Parser, Subcommand};

pub use simulate::SimulateArgs;

#[derive(Parser)]
#[command(name = "lds-posterior")]
#[command(about = "Block-tridiagonal Gaussian posteriors for linear dynamical systems")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Simulate LDS trials and smooth them with the batched posterior
    Simulate(SimulateArgs),
}
