//! Integer stage: minimizing `‖r − y‖²` over binary `y` is equivalent to
//! maximizing `Σ yⱼ (2rⱼ − 1)`, a 0-1 linear program. Solved exactly by
//! depth-first branch-and-bound: variables in decreasing gain impact,
//! feasibility intervals per constraint, unit propagation of forced
//! assignments, and an optimistic remaining-gain bound.

use super::model::{Model, Relation};
use super::{Outcome, SolveOptions};

const COEFF_EPS: f64 = 1e-12;

pub(crate) fn search(model: &Model, options: &SolveOptions) -> Outcome {
    let n = model.len();
    let eps = options.tolerance;

    // An equality over integer coefficients with a fractional right-hand
    // side can never be hit by binary variables.
    for constraint in model.constraints() {
        let integral = constraint.terms.iter()
            .all(|&(_, c)| (c - c.round()).abs() < 1e-9);
        if integral
            && constraint.relation == Relation::Eq
            && (constraint.rhs - constraint.rhs.round()).abs() > eps
        {
            return Outcome::Infeasible;
        }
    }

    let gains: Vec<f64> = model.target().iter().map(|&r| 2.0 * r - 1.0).collect();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        gains[b].abs().partial_cmp(&gains[a].abs()).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut var_constraints: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let constraints: Vec<ConstraintState> = model.constraints().iter()
        .enumerate()
        .map(|(ci, c)| {
            let mut positive = 0.0;
            let mut negative = 0.0;
            for &(idx, coeff) in &c.terms {
                if coeff.abs() < COEFF_EPS {
                    continue;
                }
                var_constraints[idx].push((ci, coeff));
                if coeff > 0.0 {
                    positive += coeff;
                } else {
                    negative += coeff;
                }
            }
            ConstraintState {
                relation: c.relation,
                rhs: c.rhs,
                fixed: 0.0,
                pos_free: positive,
                neg_free: negative,
            }
        })
        .collect();

    let remaining_pos = gains.iter().filter(|g| **g > 0.0).sum();

    let mut search = Search {
        gains,
        order,
        var_constraints,
        constraints,
        assign: vec![Unassigned; n],
        score: 0.0,
        remaining_pos,
        best: None,
        nodes: 0,
        max_nodes: options.max_branch_nodes,
        aborted: false,
        eps,
    };

    // Constraints may force assignments before any branching.
    let mut trail = Vec::new();
    if search.consistent() && search.propagate(&mut trail) {
        search.dfs(0, &mut trail);
    }

    if search.aborted {
        return Outcome::Infeasible;
    }
    match search.best {
        Some((_, assignment)) => {
            Outcome::Optimal(assignment.iter().map(|&v| if v == One { 1.0 } else { 0.0 }).collect())
        }
        None => Outcome::Infeasible,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assignment {
    Unassigned,
    Zero,
    One,
}
use Assignment::{One, Unassigned, Zero};

#[derive(Debug, Clone)]
struct ConstraintState {
    relation: Relation,
    rhs: f64,
    /// Contribution of fixed variables.
    fixed: f64,
    /// Sum of positive coefficients over free variables.
    pos_free: f64,
    /// Sum of negative coefficients over free variables.
    neg_free: f64,
}

impl ConstraintState {
    /// Whether some completion of the free variables can still satisfy
    /// the constraint.
    fn open(&self, eps: f64) -> bool {
        let tol = eps * (1.0 + self.rhs.abs());
        match self.relation {
            Relation::Eq => {
                self.fixed + self.neg_free <= self.rhs + tol
                    && self.rhs <= self.fixed + self.pos_free + tol
            }
            Relation::Leq => self.fixed + self.neg_free <= self.rhs + tol,
        }
    }
}

struct Search {
    gains: Vec<f64>,
    order: Vec<usize>,
    var_constraints: Vec<Vec<(usize, f64)>>,
    constraints: Vec<ConstraintState>,
    assign: Vec<Assignment>,
    score: f64,
    remaining_pos: f64,
    best: Option<(f64, Vec<Assignment>)>,
    nodes: u64,
    max_nodes: u64,
    aborted: bool,
    eps: f64,
}

impl Search {
    fn consistent(&self) -> bool {
        self.constraints.iter().all(|c| c.open(self.eps))
    }

    /// Fix a variable and update the affected constraint states. Returns
    /// false if some constraint becomes unsatisfiable.
    fn set(&mut self, var: usize, value: Assignment, trail: &mut Vec<usize>) -> bool {
        debug_assert!(self.assign[var] == Unassigned, "variable fixed twice");
        self.assign[var] = value;
        trail.push(var);

        if self.gains[var] > 0.0 {
            self.remaining_pos -= self.gains[var];
        }
        if value == One {
            self.score += self.gains[var];
        }

        let mut feasible = true;
        for &(ci, coeff) in &self.var_constraints[var] {
            let state = &mut self.constraints[ci];
            if coeff > 0.0 {
                state.pos_free -= coeff;
            } else {
                state.neg_free -= coeff;
            }
            if value == One {
                state.fixed += coeff;
            }
            feasible &= state.open(self.eps);
        }
        feasible
    }

    fn undo_to(&mut self, mark: usize, trail: &mut Vec<usize>) {
        while trail.len() > mark {
            let var = trail.pop().unwrap();
            let value = self.assign[var];
            self.assign[var] = Unassigned;

            if self.gains[var] > 0.0 {
                self.remaining_pos += self.gains[var];
            }
            if value == One {
                self.score -= self.gains[var];
            }
            for &(ci, coeff) in &self.var_constraints[var] {
                let state = &mut self.constraints[ci];
                if coeff > 0.0 {
                    state.pos_free += coeff;
                } else {
                    state.neg_free += coeff;
                }
                if value == One {
                    state.fixed -= coeff;
                }
            }
        }
    }

    /// Fix every variable a constraint forces, to fixpoint. Returns false
    /// on conflict.
    fn propagate(&mut self, trail: &mut Vec<usize>) -> bool {
        loop {
            let mut changed = false;
            for ci in 0..self.constraints.len() {
                let state = &self.constraints[ci];
                if !state.open(self.eps) {
                    return false;
                }
                let tol = self.eps * (1.0 + state.rhs.abs());
                let slack_high = state.fixed + state.pos_free - state.rhs;
                let slack_low = state.rhs - (state.fixed + state.neg_free);

                // Equality pinned to its maximum: take every positive
                // coefficient, drop every negative one. Pinned to its
                // minimum (or a tight ≤): the reverse.
                let force_max = state.relation == Relation::Eq && slack_high <= tol;
                let force_min = slack_low <= tol;
                if !force_max && !force_min {
                    continue;
                }

                let forced: Vec<(usize, f64)> = self.constraint_free_vars(ci);
                for (var, coeff) in forced {
                    let value = if force_max == (coeff > 0.0) { One } else { Zero };
                    if !self.set(var, value, trail) {
                        return false;
                    }
                    changed = true;
                }
            }
            if !changed {
                return true;
            }
        }
    }

    fn constraint_free_vars(&self, ci: usize) -> Vec<(usize, f64)> {
        // Walking the model's term list would be cheaper with a reverse
        // index; constraint sizes here are small multiples of the cell
        // count, so a scan is fine.
        self.var_constraints.iter()
            .enumerate()
            .filter(|(var, _)| self.assign[*var] == Unassigned)
            .flat_map(|(var, links)| {
                links.iter()
                    .filter(move |(c, _)| *c == ci)
                    .map(move |&(_, coeff)| (var, coeff))
            })
            .collect()
    }

    fn dfs(&mut self, mut cursor: usize, trail: &mut Vec<usize>) {
        if self.aborted {
            return;
        }
        self.nodes += 1;
        if self.nodes > self.max_nodes {
            self.aborted = true;
            return;
        }

        // Optimistic bound: take every remaining positive gain.
        if let Some((best_score, _)) = &self.best {
            if self.score + self.remaining_pos <= *best_score + 1e-12 {
                return;
            }
        }

        while cursor < self.order.len() && self.assign[self.order[cursor]] != Unassigned {
            cursor += 1;
        }
        let Some(&var) = self.order.get(cursor) else {
            // Every variable fixed and every constraint still open: with no
            // free mass left, open equalities are exactly satisfied.
            self.best = Some((self.score, self.assign.clone()));
            return;
        };

        let preferred = if self.gains[var] > 0.0 { One } else { Zero };
        for value in [preferred, if preferred == One { Zero } else { One }] {
            let mark = trail.len();
            if self.set(var, value, trail) && self.propagate(trail) {
                self.dfs(cursor + 1, trail);
            }
            self.undo_to(mark, trail);
            if self.aborted {
                return;
            }
        }
    }
}
