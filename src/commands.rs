use anyhow::{bail, Result};

use crate::cli::{CompareArgs, RunArgs};
use crate::config::RunConfig;
use crate::pipeline;

pub fn run(cli: &crate::cli::Cli, args: &RunArgs) -> Result<()> {
    let config = RunConfig::load(&args.config)?;
    let summary = pipeline::run(&config, cli.verbose)?;

    println!(
        "topdown finished: {} record(s) in, {} out, {} of {} node(s) solved",
        summary.records_in, summary.records_out, summary.report.solved_nodes, summary.nodes
    );

    if !summary.report.is_clean() {
        bail!(
            "{} node(s) did not reach a final integer solution",
            summary.report.infeasible.len() + summary.report.fallbacks.len()
        );
    }
    Ok(())
}

pub fn compare(cli: &crate::cli::Cli, args: &CompareArgs) -> Result<()> {
    let config = RunConfig::load(&args.config)?;
    let levels = pipeline::compare(&config, &args.left, &args.right, cli.verbose)?;

    for (depth, mean) in levels {
        println!("level {depth}: mean distance {mean:.4}");
    }
    Ok(())
}
