use anyhow::Result;
use clap::Parser;

use topdown::cli::{Cli, Commands};
use topdown::commands::{compare, run};

fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Commands::Run(args) => run(&cli, args),
        Commands::Compare(args) => compare(&cli, args),
    }
}
