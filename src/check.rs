use std::fmt;

use crate::tree::{GeoNode, NodeState};

/// A post-estimation invariant failure at one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub node: u64,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    /// Vector length differs from `|Π|`.
    Length { expected: usize, found: usize },
    /// A cell is negative.
    Negative { cell: usize, value: i64 },
    /// A non-leaf cell differs from the sum over its children.
    ChildSumMismatch { cell: usize, parent: i64, children: i64 },
    /// A node-local edit constraint fails.
    Constraint { index: usize },
    /// The node never reached a final state.
    NotSolved { state: NodeState },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::Length { expected, found } => {
                write!(f, "node {}: vector length {found}, expected {expected}", self.node)
            }
            ViolationKind::Negative { cell, value } => {
                write!(f, "node {}: cell {cell} is negative ({value})", self.node)
            }
            ViolationKind::ChildSumMismatch { cell, parent, children } => write!(
                f,
                "node {}: cell {cell} is {parent} but children sum to {children}",
                self.node
            ),
            ViolationKind::Constraint { index } => {
                write!(f, "node {}: edit constraint {index} does not hold", self.node)
            }
            ViolationKind::NotSolved { state } => {
                write!(f, "node {}: ended in state {state}", self.node)
            }
        }
    }
}

/// Verify the post-estimation invariants over the whole tree: vector
/// width, non-negativity, parent=Σchildren per cell, and the node-local
/// edit constraints. Nodes that ended infeasible are exempt from the
/// edit-constraint check but still surface every structural mismatch they
/// caused.
pub fn verify(root: &GeoNode, width: usize) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (_, nodes) in root.iterate_by_levels() {
        for node in nodes {
            if node.vector().len() != width {
                violations.push(Violation {
                    node: node.id(),
                    kind: ViolationKind::Length { expected: width, found: node.vector().len() },
                });
                continue;
            }

            if !matches!(node.state(), NodeState::SolvedInt | NodeState::Infeasible) {
                violations.push(Violation {
                    node: node.id(),
                    kind: ViolationKind::NotSolved { state: node.state() },
                });
            }

            for (cell, &value) in node.vector().iter().enumerate() {
                if value < 0 {
                    violations.push(Violation {
                        node: node.id(),
                        kind: ViolationKind::Negative { cell, value },
                    });
                }
            }

            if !node.is_leaf() {
                for cell in 0..width {
                    let children: i64 = node.children().iter()
                        .filter(|c| c.vector().len() == width)
                        .map(|c| c.vector()[cell])
                        .sum();
                    if children != node.vector()[cell] {
                        violations.push(Violation {
                            node: node.id(),
                            kind: ViolationKind::ChildSumMismatch {
                                cell,
                                parent: node.vector()[cell],
                                children,
                            },
                        });
                    }
                }
            }

            if node.state() != NodeState::Infeasible {
                for (index, constraint) in node.constraints().iter().enumerate() {
                    if !constraint.holds(node.vector()) {
                        violations.push(Violation {
                            node: node.id(),
                            kind: ViolationKind::Constraint { index },
                        });
                    }
                }
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::EditConstraint;
    use crate::tree::testutil::node;

    fn solved(id: u64, vector: Vec<i64>, constraints: Vec<EditConstraint>) -> GeoNode {
        let mut n = node(id, vector, constraints);
        n.state = NodeState::SolvedInt;
        n
    }

    fn consistent_tree() -> GeoNode {
        let mut root = solved(0, vec![3, 1, 2, 2], vec![EditConstraint::SumEquals(8)]);
        root.children.push(solved(1, vec![2, 1, 0, 1], vec![]));
        root.children.push(solved(2, vec![1, 0, 2, 1], vec![]));
        root
    }

    #[test]
    fn clean_tree_has_no_violations() {
        assert!(verify(&consistent_tree(), 4).is_empty());
    }

    #[test]
    fn detects_child_sum_mismatch() {
        let mut tree = consistent_tree();
        tree.children[0].vector[0] = 5;

        let violations = verify(&tree, 4);
        assert!(violations.iter().any(|v| {
            v.node == 0
                && matches!(v.kind, ViolationKind::ChildSumMismatch { cell: 0, parent: 3, children: 6 })
        }));
        // The child's own negative/constraint checks stay quiet.
        assert!(violations.iter().all(|v| v.node == 0));
    }

    #[test]
    fn detects_negative_cell() {
        let mut tree = consistent_tree();
        tree.children[1].vector[2] = -2;

        let violations = verify(&tree, 4);
        assert!(violations.iter().any(|v| {
            v.node == 2 && matches!(v.kind, ViolationKind::Negative { cell: 2, value: -2 })
        }));
        assert!(violations.iter().any(|v| {
            v.node == 0 && matches!(v.kind, ViolationKind::ChildSumMismatch { cell: 2, .. })
        }));
    }

    #[test]
    fn detects_broken_edit_constraint() {
        let mut tree = consistent_tree();
        tree.vector[0] = 4;

        let violations = verify(&tree, 4);
        assert!(violations.iter().any(|v| {
            v.node == 0 && matches!(v.kind, ViolationKind::Constraint { index: 0 })
        }));
    }

    #[test]
    fn infeasible_nodes_skip_constraint_check_only() {
        let mut tree = consistent_tree();
        tree.vector[0] = 5;
        tree.state = NodeState::Infeasible;

        let violations = verify(&tree, 4);
        // Constraint check exempted, but the child-sum mismatch shows.
        assert!(!violations.iter().any(|v| matches!(v.kind, ViolationKind::Constraint { .. })));
        assert!(violations.iter().any(|v| matches!(v.kind, ViolationKind::ChildSumMismatch { .. })));
    }

    #[test]
    fn unsolved_nodes_are_reported() {
        let mut tree = consistent_tree();
        tree.children[0].state = NodeState::Noisy;

        let violations = verify(&tree, 4);
        assert!(violations.iter().any(|v| {
            v.node == 1 && matches!(v.kind, ViolationKind::NotSolved { state: NodeState::Noisy })
        }));
    }
}
