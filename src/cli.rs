use clap::{Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

/// Synthetic-microdata CLI (argument schema only)
#[derive(Parser, Debug)]
#[command(name = "topdown", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline described by a configuration file
    Run(RunArgs),

    /// Compare two microdata files level by level
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON run configuration
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// JSON run configuration (provides the schema and the metric)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub config: PathBuf,

    /// Reference microdata file
    #[arg(value_hint = ValueHint::FilePath)]
    pub left: PathBuf,

    /// Candidate microdata file
    #[arg(value_hint = ValueHint::FilePath)]
    pub right: PathBuf,
}
