use serde::Deserialize;

use anyhow::{ensure, Result};

/// Tolerance for evaluating float-coefficient predicates on integer vectors.
const EVAL_TOLERANCE: f64 = 1e-6;

/// A linear predicate template from the configuration, not yet bound to a node.
///
/// Templates are materialized into closed [`EditConstraint`]s at tree-build
/// time by capturing the node's total record count. Keeping them as data
/// (rather than callables) lets the solver translate them into its native
/// constraint form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintTemplate {
    /// `Σv = t`, where `t` is the node's record count at build time.
    SumEqualsTotal,
    /// `a·v = b` for a fixed coefficient vector `a` and constant `b`.
    LinearEquals { coeffs: Vec<f64>, rhs: f64 },
    /// `a·v ≤ b` for a fixed coefficient vector `a` and constant `b`.
    LinearLeq { coeffs: Vec<f64>, rhs: f64 },
}

impl ConstraintTemplate {
    /// Materialize the template for a node whose subset holds `total` records.
    pub fn bind(&self, total: i64) -> EditConstraint {
        match self {
            ConstraintTemplate::SumEqualsTotal => EditConstraint::SumEquals(total),
            ConstraintTemplate::LinearEquals { coeffs, rhs } => {
                EditConstraint::LinearEquals { coeffs: coeffs.clone(), rhs: *rhs }
            }
            ConstraintTemplate::LinearLeq { coeffs, rhs } => {
                EditConstraint::LinearLeq { coeffs: coeffs.clone(), rhs: *rhs }
            }
        }
    }

    /// Check that the template's coefficient vector matches the cell count.
    pub fn validate_width(&self, width: usize) -> Result<()> {
        match self {
            ConstraintTemplate::SumEqualsTotal => Ok(()),
            ConstraintTemplate::LinearEquals { coeffs, .. }
            | ConstraintTemplate::LinearLeq { coeffs, .. } => {
                ensure!(
                    coeffs.len() == width,
                    "[constraint] coefficient vector has {} entries, expected {}",
                    coeffs.len(),
                    width
                );
                ensure!(
                    coeffs.iter().all(|c| c.is_finite()),
                    "[constraint] coefficient vector contains a non-finite value"
                );
                Ok(())
            }
        }
    }
}

/// A closed edit constraint over a single node's contingency vector.
#[derive(Debug, Clone, PartialEq)]
pub enum EditConstraint {
    /// `Σv = t` for the captured record count `t`.
    SumEquals(i64),
    /// `a·v = b`.
    LinearEquals { coeffs: Vec<f64>, rhs: f64 },
    /// `a·v ≤ b`.
    LinearLeq { coeffs: Vec<f64>, rhs: f64 },
}

impl EditConstraint {
    /// Evaluate the predicate on an integer vector.
    pub fn holds(&self, v: &[i64]) -> bool {
        match self {
            EditConstraint::SumEquals(total) => v.iter().sum::<i64>() == *total,
            EditConstraint::LinearEquals { coeffs, rhs } => {
                (dot(coeffs, v) - rhs).abs() <= EVAL_TOLERANCE * (1.0 + rhs.abs())
            }
            EditConstraint::LinearLeq { coeffs, rhs } => {
                dot(coeffs, v) - rhs <= EVAL_TOLERANCE * (1.0 + rhs.abs())
            }
        }
    }
}

fn dot(coeffs: &[f64], v: &[i64]) -> f64 {
    debug_assert!(coeffs.len() == v.len(), "coefficient/vector length mismatch");
    coeffs.iter().zip(v.iter()).map(|(c, x)| c * *x as f64).sum()
}
