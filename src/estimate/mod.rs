//! Estimation: restore non-negativity, integrality, edit constraints, and
//! parent=Σchildren consistency after measurement.
//!
//! The root vector is fixed first (non-negative least squares, then
//! controlled rounding). Every non-leaf node then gets a joint program
//! over the concatenation of its children's noisy vectors: each child's
//! edit constraints lifted onto its slice, plus one per-cell equality
//! tying the slices to the parent's already-final vector. Parents are
//! processed strictly before their children, level by level.

use std::fs;
use std::path::PathBuf;

use ahash::AHashSet;
use anyhow::Result;

use crate::constraint::EditConstraint;
use crate::solve::{self, LinearConstraint, Model, Outcome, Relation, SolveOptions};
use crate::tree::{GeoNode, NodeState};

/// Estimation knobs: solver budgets plus where to dump infeasible models.
#[derive(Debug, Clone, Default)]
pub struct EstimateOptions {
    pub solve: SolveOptions,
    pub model_dump_dir: Option<PathBuf>,
}

/// What happened across the tree. A run is clean when both failure lists
/// are empty.
#[derive(Debug, Clone, Default)]
pub struct EstimateReport {
    /// Nodes whose vector reached `SolvedInt`.
    pub solved_nodes: usize,
    /// Nodes whose stage-1 program was infeasible; their subtrees keep
    /// noisy vectors.
    pub infeasible: Vec<u64>,
    /// Parents whose stage-2 rounding was infeasible; the floor of the
    /// stage-1 solution was written instead.
    pub fallbacks: Vec<u64>,
}

impl EstimateReport {
    /// Check if every node reached `SolvedInt`.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.infeasible.is_empty() && self.fallbacks.is_empty()
    }
}

/// Estimate the whole tree, root pass included.
pub fn estimate(
    root: &mut GeoNode,
    options: &EstimateOptions,
    verbose: u8,
) -> Result<EstimateReport> {
    estimate_from(root, 0, options, verbose)
}

/// Estimate from `start_depth` downward. Vectors at shallower levels are
/// taken as authoritative integers (the resume path); `start_depth == 0`
/// runs the root pass first.
pub fn estimate_from(
    root: &mut GeoNode,
    start_depth: usize,
    options: &EstimateOptions,
    verbose: u8,
) -> Result<EstimateReport> {
    let mut report = EstimateReport::default();
    let mut skipped: AHashSet<u64> = AHashSet::new();

    if start_depth == 0 {
        solve_root(root, options, &mut report, &mut skipped)?;
    }

    let levels = root.level_paths();
    for (depth, paths) in levels.iter().enumerate().skip(start_depth) {
        if verbose > 1 {
            eprintln!("[estimate] level {depth}: {} node(s)", paths.len());
        }
        for path in paths {
            let parent = root.node_at_mut(path);
            if parent.children.is_empty() {
                continue;
            }
            if skipped.contains(&parent.id) {
                // The parent never got a vector; its children cannot be
                // estimated either.
                for child in &parent.children {
                    skipped.insert(child.id);
                }
                continue;
            }
            solve_children(parent, options, &mut report, &mut skipped)?;
        }
    }
    Ok(report)
}

/// Stage 1 + stage 2 on the root's own vector.
fn solve_root(
    root: &mut GeoNode,
    options: &EstimateOptions,
    report: &mut EstimateReport,
    skipped: &mut AHashSet<u64>,
) -> Result<()> {
    let width = root.vector.len();
    let target: Vec<f64> = root.vector.iter().map(|&v| v as f64).collect();

    let mut model = Model::non_negative(format!("nnls_node_{}", root.id), target);
    for constraint in &root.constraints {
        model.add_constraint(lift(constraint, 0, width));
    }

    let x = match solve::solve(&model, &options.solve)? {
        Outcome::Infeasible => {
            report_infeasible(&model, root.id, "stage 1", options);
            root.state = NodeState::Infeasible;
            report.infeasible.push(root.id);
            skipped.insert(root.id);
            return Ok(());
        }
        Outcome::Optimal(x) => x,
    };
    root.state = NodeState::SolvedReal;

    let (floor, residual) = split_floor(&x);
    let mut round = Model::binary(format!("round_node_{}", root.id), residual);
    for constraint in &root.constraints {
        let mut shifted = shift_by_floor(lift(constraint, 0, width), &floor);
        snap_integral(&mut shifted);
        round.add_constraint(shifted);
    }

    match solve::solve(&round, &options.solve)? {
        Outcome::Optimal(y) => {
            root.vector = combine(&floor, &y);
            root.state = NodeState::SolvedInt;
            report.solved_nodes += 1;
        }
        Outcome::Infeasible => {
            report_infeasible(&round, root.id, "stage 2", options);
            root.vector = floor.iter().map(|&f| f as i64).collect();
            root.state = NodeState::Infeasible;
            report.fallbacks.push(root.id);
        }
    }
    Ok(())
}

/// Joint program over all children of one parent.
fn solve_children(
    parent: &mut GeoNode,
    options: &EstimateOptions,
    report: &mut EstimateReport,
    skipped: &mut AHashSet<u64>,
) -> Result<()> {
    let width = parent.vector.len();
    let m = parent.children.len();

    let target: Vec<f64> = parent.children.iter()
        .flat_map(|child| child.vector.iter().map(|&v| v as f64))
        .collect();

    let mut model = Model::non_negative(format!("nnls_node_{}", parent.id), target);
    // Local edit constraints, each lifted onto its child's slice. The
    // slice offset is computed per child here, not captured from a shared
    // loop variable.
    for (i, child) in parent.children.iter().enumerate() {
        for constraint in &child.constraints {
            model.add_constraint(lift(constraint, i * width, width));
        }
    }
    // Hierarchical consistency against the parent's final vector.
    for j in 0..width {
        model.add_constraint(LinearConstraint::equality(
            (0..m).map(|i| (i * width + j, 1.0)).collect(),
            parent.vector[j] as f64,
        ));
    }

    let x = match solve::solve(&model, &options.solve)? {
        Outcome::Infeasible => {
            report_infeasible(&model, parent.id, "stage 1", options);
            report.infeasible.push(parent.id);
            for child in &parent.children {
                skipped.insert(child.id);
            }
            return Ok(());
        }
        Outcome::Optimal(x) => x,
    };
    for child in parent.children.iter_mut() {
        child.state = NodeState::SolvedReal;
    }

    let (floor, residual) = split_floor(&x);
    let mut round = Model::binary(format!("round_node_{}", parent.id), residual);
    for constraint in model.constraints() {
        let mut shifted = shift_by_floor(constraint.clone(), &floor);
        snap_integral(&mut shifted);
        round.add_constraint(shifted);
    }

    match solve::solve(&round, &options.solve)? {
        Outcome::Optimal(y) => {
            let combined = combine(&floor, &y);
            for (i, child) in parent.children.iter_mut().enumerate() {
                child.vector.copy_from_slice(&combined[i * width..(i + 1) * width]);
                child.state = NodeState::SolvedInt;
            }
            report.solved_nodes += m;
        }
        Outcome::Infeasible => {
            report_infeasible(&round, parent.id, "stage 2", options);
            for (i, child) in parent.children.iter_mut().enumerate() {
                for j in 0..width {
                    child.vector[j] = floor[i * width + j] as i64;
                }
                child.state = NodeState::Infeasible;
            }
            report.fallbacks.push(parent.id);
        }
    }
    Ok(())
}

/// Translate an edit constraint into solver form on a slice of the
/// decision vector.
fn lift(constraint: &EditConstraint, offset: usize, width: usize) -> LinearConstraint {
    match constraint {
        EditConstraint::SumEquals(total) => LinearConstraint::equality(
            (0..width).map(|j| (offset + j, 1.0)).collect(),
            *total as f64,
        ),
        EditConstraint::LinearEquals { coeffs, rhs } => LinearConstraint::equality(
            coeffs.iter().enumerate().map(|(j, &c)| (offset + j, c)).collect(),
            *rhs,
        ),
        EditConstraint::LinearLeq { coeffs, rhs } => LinearConstraint::at_most(
            coeffs.iter().enumerate().map(|(j, &c)| (offset + j, c)).collect(),
            *rhs,
        ),
    }
}

/// Rewrite a constraint on `x_f + y` as one on `y` alone.
fn shift_by_floor(mut constraint: LinearConstraint, floor: &[f64]) -> LinearConstraint {
    constraint.rhs -= constraint.terms.iter()
        .map(|&(idx, coeff)| coeff * floor[idx])
        .sum::<f64>();
    constraint
}

/// An equality with integer coefficients has an integer left-hand side
/// over binary variables, so projection drift in the right-hand side is
/// rounded away at the phase boundary.
fn snap_integral(constraint: &mut LinearConstraint) {
    if constraint.relation != Relation::Eq {
        return;
    }
    let integral = constraint.terms.iter().all(|&(_, c)| (c - c.round()).abs() < 1e-9);
    if integral && (constraint.rhs - constraint.rhs.round()).abs() < 1e-3 {
        constraint.rhs = constraint.rhs.round();
    }
}

/// Clamp solver noise, then split into integer floor and residual. A
/// residual within rounding noise of 1 is folded into the floor.
fn split_floor(x: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut floor = Vec::with_capacity(x.len());
    let mut residual = Vec::with_capacity(x.len());
    for &value in x {
        let value = value.max(0.0);
        let mut f = value.floor();
        let mut r = value - f;
        if r > 1.0 - 1e-9 {
            f += 1.0;
            r = 0.0;
        }
        floor.push(f);
        residual.push(r);
    }
    (floor, residual)
}

fn combine(floor: &[f64], y: &[f64]) -> Vec<i64> {
    floor.iter()
        .zip(y)
        .map(|(&f, &bit)| f as i64 + bit.round() as i64)
        .collect()
}

fn report_infeasible(model: &Model, node: u64, stage: &str, options: &EstimateOptions) {
    eprintln!("[estimate] node {node} is infeasible ({stage})");
    if let Some(dir) = &options.model_dump_dir {
        let write = fs::create_dir_all(dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| model.write_lp(&dir.join(format!("infeasible_model_node_{node}.lp"))));
        if let Err(err) = write {
            eprintln!("[estimate] could not dump model for node {node}: {err}");
        }
    }
}
