use anyhow::Result;
use clap::Parser;
use lds_posterior::cli::{simulate, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Simulate(args) => {
            simulate::run(args)?;
        }
    }

    Ok(())
}
