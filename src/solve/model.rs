use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Direction of a linear constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Leq,
}

/// A sparse linear constraint `Σ coeff·x[idx]  (= | ≤)  rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub terms: Vec<(usize, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

impl LinearConstraint {
    pub fn equality(terms: Vec<(usize, f64)>, rhs: f64) -> Self {
        Self { terms, relation: Relation::Eq, rhs }
    }

    pub fn at_most(terms: Vec<(usize, f64)>, rhs: f64) -> Self {
        Self { terms, relation: Relation::Leq, rhs }
    }

    /// Left-hand side value at `x`.
    pub fn eval(&self, x: &[f64]) -> f64 {
        self.terms.iter().map(|&(idx, coeff)| coeff * x[idx]).sum()
    }

    /// Constraint violation at `x`, scaled by the magnitude of the
    /// right-hand side.
    pub fn violation(&self, x: &[f64]) -> f64 {
        let gap = self.eval(x) - self.rhs;
        let gap = match self.relation {
            Relation::Eq => gap.abs(),
            Relation::Leq => gap.max(0.0),
        };
        gap / (1.0 + self.rhs.abs())
    }
}

/// Bounds and integrality of one decision variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variable {
    pub lower: f64,
    pub upper: f64,
    pub integer: bool,
}

/// A least-squares model: minimize `‖x − target‖²` over the variable box,
/// integrality, and linear constraints.
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    target: Vec<f64>,
    variables: Vec<Variable>,
    constraints: Vec<LinearConstraint>,
}

impl Model {
    /// Continuous model over `x ≥ 0`.
    pub fn non_negative(name: impl Into<String>, target: Vec<f64>) -> Self {
        let variables = vec![
            Variable { lower: 0.0, upper: f64::INFINITY, integer: false };
            target.len()
        ];
        Self { name: name.into(), target, variables, constraints: Vec::new() }
    }

    /// All-binary model over `y ∈ {0, 1}`.
    pub fn binary(name: impl Into<String>, target: Vec<f64>) -> Self {
        let variables = vec![Variable { lower: 0.0, upper: 1.0, integer: true }; target.len()];
        Self { name: name.into(), target, variables, constraints: Vec::new() }
    }

    /// Append a linear constraint.
    pub fn add_constraint(&mut self, constraint: LinearConstraint) {
        self.constraints.push(constraint);
    }

    /// Get the model name (used in diagnostics).
    #[inline] pub fn name(&self) -> &str { &self.name }

    /// Get the number of decision variables.
    #[inline] pub fn len(&self) -> usize { self.target.len() }

    /// Check if the model has no variables.
    #[inline] pub fn is_empty(&self) -> bool { self.target.is_empty() }

    /// Get the least-squares target.
    #[inline] pub fn target(&self) -> &[f64] { &self.target }

    /// Get the decision variables.
    #[inline] pub fn variables(&self) -> &[Variable] { &self.variables }

    /// Get the linear constraints.
    #[inline] pub fn constraints(&self) -> &[LinearConstraint] { &self.constraints }

    /// Serialize the model in LP-style text for offline inspection of
    /// infeasible nodes.
    pub fn write_lp(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_lp())
            .with_context(|| format!("[solve] Failed to write model to {}", path.display()))
    }

    fn to_lp(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\\ Model {}", self.name);
        let _ = writeln!(out, "Minimize");
        let _ = write!(out, "  [");
        for (i, t) in self.target.iter().enumerate() {
            let _ = write!(out, " ( x{i} - {t} )^2");
        }
        let _ = writeln!(out, " ]");

        let _ = writeln!(out, "Subject To");
        for (ci, constraint) in self.constraints.iter().enumerate() {
            let _ = write!(out, "  c{ci}:");
            for &(idx, coeff) in &constraint.terms {
                let _ = write!(out, " {coeff:+} x{idx}");
            }
            let op = match constraint.relation {
                Relation::Eq => "=",
                Relation::Leq => "<=",
            };
            let _ = writeln!(out, " {op} {}", constraint.rhs);
        }

        let _ = writeln!(out, "Bounds");
        for (i, var) in self.variables.iter().enumerate() {
            if var.upper.is_finite() {
                let _ = writeln!(out, "  {} <= x{i} <= {}", var.lower, var.upper);
            } else {
                let _ = writeln!(out, "  {} <= x{i}", var.lower);
            }
        }

        let binaries: Vec<String> = self.variables.iter().enumerate()
            .filter(|(_, v)| v.integer)
            .map(|(i, _)| format!("x{i}"))
            .collect();
        if !binaries.is_empty() {
            let _ = writeln!(out, "Binaries");
            let _ = writeln!(out, "  {}", binaries.join(" "));
        }

        let _ = writeln!(out, "End");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_eval_and_violation() {
        let c = LinearConstraint::equality(vec![(0, 1.0), (2, 2.0)], 5.0);
        assert_eq!(c.eval(&[1.0, 9.0, 2.0]), 5.0);
        assert_eq!(c.violation(&[1.0, 9.0, 2.0]), 0.0);
        assert!(c.violation(&[0.0, 0.0, 0.0]) > 0.0);

        let c = LinearConstraint::at_most(vec![(0, 1.0)], 3.0);
        assert_eq!(c.violation(&[2.0]), 0.0);
        assert!(c.violation(&[5.0]) > 0.0);
    }

    #[test]
    fn constructors_set_bounds() {
        let m = Model::non_negative("m", vec![1.0, 2.0]);
        assert_eq!(m.len(), 2);
        assert!(m.variables().iter().all(|v| !v.integer && v.lower == 0.0));

        let m = Model::binary("m", vec![0.5, 0.5]);
        assert!(m.variables().iter().all(|v| v.integer && v.upper == 1.0));
    }

    #[test]
    fn lp_dump_mentions_constraints() {
        let mut m = Model::binary("round_node_3", vec![0.5, 0.25]);
        m.add_constraint(LinearConstraint::equality(vec![(0, 1.0), (1, 1.0)], 1.0));
        let text = m.to_lp();

        assert!(text.contains("Model round_node_3"));
        assert!(text.contains("c0: +1 x0 +1 x1 = 1"));
        assert!(text.contains("Binaries"));
    }
}
