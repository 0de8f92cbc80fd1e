mod branch;
mod model;
mod project;

use anyhow::{bail, Result};

pub use model::{LinearConstraint, Model, Relation, Variable};

/// Result of solving a model: the optimal decision vector, or a proof that
/// the constraints admit no solution within the solver's budget.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Optimal(Vec<f64>),
    Infeasible,
}

/// Resource limits for a single model. A model that exhausts its budget is
/// reported infeasible, like a timeout.
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    pub max_projection_iterations: usize,
    pub max_branch_nodes: u64,
    pub tolerance: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_projection_iterations: 50_000,
            max_branch_nodes: 2_000_000,
            tolerance: 1e-6,
        }
    }
}

/// Solve a model: least-squares to its target under bounds, integrality,
/// and linear constraints.
///
/// Continuous non-negative models are Euclidean projections and go through
/// Dykstra's alternating-projection scheme; all-binary models go through
/// exact branch-and-bound. Mixed integrality is not used by the estimation
/// stages and is rejected.
pub fn solve(model: &Model, options: &SolveOptions) -> Result<Outcome> {
    if model.variables().iter().all(|v| !v.integer) {
        Ok(project::project(model, options))
    } else if model.variables().iter().all(|v| v.integer && v.lower == 0.0 && v.upper == 1.0) {
        Ok(branch::search(model, options))
    } else {
        bail!("[solve] model '{}' mixes integrality kinds", model.name());
    }
}
