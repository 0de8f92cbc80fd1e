use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use polars::frame::DataFrame;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::check::{self, Violation};
use crate::config::RunConfig;
use crate::estimate::{self, EstimateOptions, EstimateReport};
use crate::metrics::DistanceMetric;
use crate::microdata;
use crate::noise;
use crate::schema::{read_records, Permutation, RecordTable};
use crate::tree::{self, GeoNode};

/// What a finished run looked like.
#[derive(Debug)]
pub struct RunSummary {
    pub records_in: usize,
    pub records_out: u64,
    pub nodes: usize,
    pub report: EstimateReport,
    pub violations: Vec<Violation>,
}

impl RunSummary {
    /// Check if every node reached its final state and every invariant
    /// holds.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.report.is_clean() && self.violations.is_empty()
    }
}

/// Run the full pipeline: build, measure, estimate, emit, check.
pub fn run(config: &RunConfig, verbose: u8) -> Result<RunSummary> {
    let started = Instant::now();
    let geo = config.geo_columns_in_use();

    if verbose > 0 {
        eprintln!("[run] loading {}", config.input_path.display());
    }
    let df = read_records(&config.input_path, config.separator_byte())?;
    let table = RecordTable::from_dataframe(&df, geo, &config.queries)?;
    let perm = Permutation::canonicalize(&table)?;
    let cells = perm.row_cells(&table)?;
    if verbose > 0 {
        eprintln!("[run] {} records over {} query cells", table.len(), perm.len());
    }

    let (mut root, resume_depth) = match &config.processed_data_path {
        Some(path) => {
            if verbose > 0 {
                eprintln!("[run] resuming from {}", path.display());
            }
            build_resumed(config, path, geo, &table, &cells, &perm)?
        }
        None => {
            let root = tree::build(
                &table,
                &cells,
                &perm,
                &config.geo_constraints,
                &config.root_constraints,
            )?;
            (root, 0)
        }
    };
    let nodes = root.count_nodes();
    if verbose > 0 {
        eprintln!("[run] tree built: {nodes} nodes, depth {}", config.depth());
    }

    if config.distance_metric.is_some() {
        root.snapshot_reference();
    }

    if config.disable_noise {
        if verbose > 0 {
            eprintln!("[measure] noise disabled, counts pass through exactly");
        }
    } else {
        let noise_start = if resume_depth == 0 { 0 } else { resume_depth + 1 };
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        if verbose > 0 {
            eprintln!(
                "[measure] {} from level {noise_start}",
                config.mechanism.name()
            );
        }
        noise::perturb_from(
            &mut root,
            config.mechanism,
            &config.privacy_parameters,
            noise_start,
            &mut rng,
        )?;
    }

    let options = EstimateOptions {
        solve: Default::default(),
        model_dump_dir: Some(diagnostics_dir(&config.output_path)),
    };
    let report = estimate::estimate_from(&mut root, resume_depth, &options, verbose)?;
    if verbose > 0 {
        eprintln!(
            "[estimate] {} node(s) solved, {} infeasible, {} fallback(s)",
            report.solved_nodes,
            report.infeasible.len(),
            report.fallbacks.len()
        );
    }

    let records_out =
        microdata::write_microdata(&root, &perm, geo, &config.output_path, config.separator_byte())?;
    if verbose > 0 {
        eprintln!(
            "[emit] {} record(s) written to {}",
            records_out,
            config.output_path.display()
        );
    }

    let violations = check::verify(&root, perm.len());
    for violation in &violations {
        eprintln!("[check] {violation}");
    }

    if let Some(metric) = config.distance_metric {
        for (depth, mean) in level_distances(&root, metric) {
            eprintln!("[distance] level {depth}: mean {} = {mean:.4}", metric.name());
        }
    }

    if verbose > 0 {
        eprintln!("[run] finished in {:.2}s", started.elapsed().as_secs_f64());
    }

    Ok(RunSummary { records_in: table.len(), records_out, nodes, report, violations })
}

/// Read the checkpoint, validate it against the current configuration,
/// and rebuild + extend the tree.
fn build_resumed(
    config: &RunConfig,
    checkpoint: &Path,
    geo: &[String],
    table: &RecordTable,
    cells: &[usize],
    perm: &Permutation,
) -> Result<(GeoNode, usize)> {
    let df = read_records(checkpoint, config.separator_byte())?;
    let prefix = checkpoint_prefix(&df, geo)?;

    let processed = RecordTable::from_dataframe(&df, prefix, &config.queries)
        .context("[resume] checkpoint does not carry the configured query columns")?;
    let processed_cells = perm.row_cells(&processed)
        .context("[resume] checkpoint carries query values outside the canonical domain")?;

    tree::build_resumed(
        table,
        cells,
        &processed,
        &processed_cells,
        perm,
        &config.geo_constraints,
        &config.root_constraints,
    )
}

/// The geographic columns present in a checkpoint must be a non-empty
/// proper prefix of the configured ones.
fn checkpoint_prefix<'a>(df: &DataFrame, geo: &'a [String]) -> Result<&'a [String]> {
    let names: Vec<&str> = df.get_column_names().iter().map(|s| s.as_str()).collect();

    let mut depth = 0;
    while depth < geo.len() && names.contains(&geo[depth].as_str()) {
        depth += 1;
    }
    ensure!(
        depth > 0,
        "[resume] checkpoint has none of the configured geographic columns"
    );
    ensure!(
        depth < geo.len(),
        "[resume] checkpoint already covers every configured geographic level"
    );
    for column in &geo[depth..] {
        ensure!(
            !names.contains(&column.as_str()),
            "[resume] checkpoint geographic columns are not a prefix (found '{column}' without its ancestors)"
        );
    }
    Ok(&geo[..depth])
}

/// Where infeasible-model dumps land: next to the output file.
fn diagnostics_dir(output_path: &Path) -> PathBuf {
    match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Mean per-level distance between each node's vector and its
/// pre-measurement snapshot.
fn level_distances(root: &GeoNode, metric: DistanceMetric) -> Vec<(usize, f64)> {
    root.iterate_by_levels()
        .into_iter()
        .filter_map(|(depth, nodes)| {
            let distances: Vec<f64> = nodes.iter()
                .filter_map(|n| n.reference().map(|r| metric.compute(n.vector(), r)))
                .collect();
            if distances.is_empty() {
                None
            } else {
                Some((depth, distances.iter().sum::<f64>() / distances.len() as f64))
            }
        })
        .collect()
}

/// Compare two microdata files sharing the configured schema: mean
/// distance per tree level, under the configured metric (default TVD).
pub fn compare(
    config: &RunConfig,
    left: &Path,
    right: &Path,
    verbose: u8,
) -> Result<Vec<(usize, f64)>> {
    let geo = config.geo_columns_in_use();
    let metric = config.distance_metric.unwrap_or(DistanceMetric::Tvd);

    let left_df = read_records(left, config.separator_byte())?;
    let left_table = RecordTable::from_dataframe(&left_df, geo, &config.queries)?;
    let perm = Permutation::canonicalize(&left_table)?;
    let left_cells = perm.row_cells(&left_table)?;
    let left_root = tree::build(&left_table, &left_cells, &perm, &Default::default(), &[])?;

    let right_df = read_records(right, config.separator_byte())?;
    let right_table = RecordTable::from_dataframe(&right_df, geo, &config.queries)?;
    let right_cells = perm.row_cells(&right_table)
        .context("[compare] right file carries query values the left one never saw")?;
    let right_root = tree::build(&right_table, &right_cells, &perm, &Default::default(), &[])?;

    if verbose > 0 {
        eprintln!(
            "[compare] {} vs {} node(s)",
            left_root.count_nodes(),
            right_root.count_nodes()
        );
    }

    let left_levels = left_root.iterate_by_levels();
    let right_levels = right_root.iterate_by_levels();
    let mut result = Vec::new();
    for ((depth, left_nodes), (_, right_nodes)) in left_levels.iter().zip(right_levels.iter()) {
        let distances: Vec<f64> = left_nodes.iter()
            .zip(right_nodes.iter())
            .map(|(a, b)| metric.compute(a.vector(), b.vector()))
            .collect();
        if !distances.is_empty() {
            result.push((*depth, distances.iter().sum::<f64>() / distances.len() as f64));
        }
    }
    Ok(result)
}
