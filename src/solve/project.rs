//! Continuous stage: the least-squares optimum under convex constraints is
//! the Euclidean projection of the target onto the feasible set, computed
//! with Dykstra's alternating-projection algorithm. Each linear constraint
//! is one projector (hyperplane or halfspace); the variable box is a final
//! clamp per sweep.

use super::model::{Model, Relation};
use super::{Outcome, SolveOptions};

/// A plateaued residual this large after the iteration budget means the
/// constraint sets do not intersect.
const INFEASIBLE_RESIDUAL: f64 = 1e-4;

pub(crate) fn project(model: &Model, options: &SolveOptions) -> Outcome {
    let n = model.len();

    // Constraints with no support can only be checked, not projected onto.
    for constraint in model.constraints() {
        if constraint.terms.iter().all(|&(_, c)| c == 0.0) {
            let gap = match constraint.relation {
                Relation::Eq => constraint.rhs.abs(),
                Relation::Leq => (-constraint.rhs).max(0.0),
            };
            if gap > options.tolerance * (1.0 + constraint.rhs.abs()) {
                return Outcome::Infeasible;
            }
        }
    }

    let norms: Vec<f64> = model.constraints().iter()
        .map(|c| c.terms.iter().map(|&(_, coeff)| coeff * coeff).sum::<f64>())
        .collect();

    // Start from the target clamped into the box.
    let mut x: Vec<f64> = model.target().iter()
        .zip(model.variables())
        .map(|(&t, v)| t.clamp(v.lower, v.upper))
        .collect();

    // Dykstra corrections: one sparse vector per constraint, one dense for
    // the box.
    let mut corrections: Vec<Vec<f64>> = model.constraints().iter()
        .map(|c| vec![0.0; c.terms.len()])
        .collect();
    let mut box_correction = vec![0.0; n];

    let scale = 1.0 + model.target().iter().fold(0.0f64, |m, t| m.max(t.abs()));
    let mut previous = x.clone();

    for _ in 0..options.max_projection_iterations {
        for (ci, constraint) in model.constraints().iter().enumerate() {
            if norms[ci] == 0.0 {
                continue;
            }

            // y = x + e, evaluated on the constraint's support only.
            for (k, &(idx, _)) in constraint.terms.iter().enumerate() {
                x[idx] += corrections[ci][k];
            }
            let value = constraint.eval(&x);
            let step = match constraint.relation {
                Relation::Eq => (constraint.rhs - value) / norms[ci],
                Relation::Leq => ((constraint.rhs - value) / norms[ci]).min(0.0),
            };
            // x = P(y); e = y - x.
            for (k, &(idx, coeff)) in constraint.terms.iter().enumerate() {
                let moved = step * coeff;
                corrections[ci][k] = -moved;
                x[idx] += moved;
            }
        }

        // Box projection.
        for (i, var) in model.variables().iter().enumerate() {
            let y = x[i] + box_correction[i];
            let clamped = y.clamp(var.lower, var.upper);
            box_correction[i] = y - clamped;
            x[i] = clamped;
        }

        let residual = model.constraints().iter()
            .map(|c| c.violation(&x))
            .fold(0.0f64, f64::max);
        let change = x.iter()
            .zip(&previous)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f64, f64::max);

        if residual < options.tolerance && change < options.tolerance * scale * 1e-3 {
            return Outcome::Optimal(x);
        }
        previous.copy_from_slice(&x);
    }

    // Ran out of iterations: a small plateau is solver noise, a large one
    // is an empty feasible set.
    let residual = model.constraints().iter()
        .map(|c| c.violation(&x))
        .fold(0.0f64, f64::max);
    if residual < INFEASIBLE_RESIDUAL {
        Outcome::Optimal(x)
    } else {
        Outcome::Infeasible
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::LinearConstraint;
    use super::*;

    fn run(model: &Model) -> Outcome {
        project(model, &SolveOptions::default())
    }

    #[test]
    fn unconstrained_returns_clamped_target() {
        let model = Model::non_negative("m", vec![3.0, -2.0, 0.5]);
        let Outcome::Optimal(x) = run(&model) else { panic!("expected optimum") };
        assert_eq!(x, vec![3.0, 0.0, 0.5]);
    }

    #[test]
    fn projects_onto_sum_hyperplane() {
        // Project [3,1,2,2]+noise-free target onto Σx = 8: already there.
        let mut model = Model::non_negative("m", vec![3.0, 1.0, 2.0, 2.0]);
        model.add_constraint(LinearConstraint::equality(
            (0..4).map(|i| (i, 1.0)).collect(),
            8.0,
        ));
        let Outcome::Optimal(x) = run(&model) else { panic!("expected optimum") };
        for (a, b) in x.iter().zip([3.0, 1.0, 2.0, 2.0]) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn redistributes_excess_mass_evenly() {
        // Target sums to 10, constrained to 8: each coordinate drops 0.5.
        let mut model = Model::non_negative("m", vec![4.0, 2.0, 2.0, 2.0]);
        model.add_constraint(LinearConstraint::equality(
            (0..4).map(|i| (i, 1.0)).collect(),
            8.0,
        ));
        let Outcome::Optimal(x) = run(&model) else { panic!("expected optimum") };
        for (a, b) in x.iter().zip([3.5, 1.5, 1.5, 1.5]) {
            assert!((a - b).abs() < 1e-4, "{x:?}");
        }
    }

    #[test]
    fn negativity_is_repaired() {
        // Noisy target with a negative cell, Σx = 4.
        let mut model = Model::non_negative("m", vec![-1.0, 3.0, 2.0]);
        model.add_constraint(LinearConstraint::equality(
            (0..3).map(|i| (i, 1.0)).collect(),
            4.0,
        ));
        let Outcome::Optimal(x) = run(&model) else { panic!("expected optimum") };
        let sum: f64 = x.iter().sum();
        assert!((sum - 4.0).abs() < 1e-5);
        assert!(x.iter().all(|&v| v >= -1e-9), "{x:?}");
    }

    #[test]
    fn halfspace_binds_only_when_violated() {
        let mut model = Model::non_negative("m", vec![1.0, 1.0]);
        model.add_constraint(LinearConstraint::at_most(vec![(0, 1.0), (1, 1.0)], 5.0));
        let Outcome::Optimal(x) = run(&model) else { panic!("expected optimum") };
        assert!((x[0] - 1.0).abs() < 1e-6 && (x[1] - 1.0).abs() < 1e-6);

        let mut model = Model::non_negative("m", vec![4.0, 4.0]);
        model.add_constraint(LinearConstraint::at_most(vec![(0, 1.0), (1, 1.0)], 5.0));
        let Outcome::Optimal(x) = run(&model) else { panic!("expected optimum") };
        assert!((x[0] - 2.5).abs() < 1e-4 && (x[1] - 2.5).abs() < 1e-4);
    }

    #[test]
    fn contradictory_constraints_are_infeasible() {
        // x₀ = 5 and Σx = 2 cannot hold together with x ≥ 0.
        let mut model = Model::non_negative("m", vec![1.0, 1.0]);
        model.add_constraint(LinearConstraint::equality(vec![(0, 1.0)], 5.0));
        model.add_constraint(LinearConstraint::equality(vec![(0, 1.0), (1, 1.0)], 2.0));
        assert_eq!(run(&model), Outcome::Infeasible);
    }

    #[test]
    fn empty_support_constraint_checks_rhs() {
        let mut model = Model::non_negative("m", vec![1.0]);
        model.add_constraint(LinearConstraint::equality(vec![(0, 0.0)], 3.0));
        assert_eq!(run(&model), Outcome::Infeasible);
    }
}
