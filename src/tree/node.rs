use std::collections::VecDeque;
use std::fmt;

use crate::constraint::EditConstraint;

/// Lifecycle of a node's contingency vector.
///
/// Built by tree construction, perturbed by measurement, then fixed by the
/// two estimation stages. `Infeasible` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Untouched,
    Built,
    Noisy,
    SolvedReal,
    SolvedInt,
    Infeasible,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Untouched => "untouched",
            NodeState::Built => "built",
            NodeState::Noisy => "noisy",
            NodeState::SolvedReal => "solved_real",
            NodeState::SolvedInt => "solved_int",
            NodeState::Infeasible => "infeasible",
        };
        write!(f, "{name}")
    }
}

/// A single geographic cell: its labels, contingency vector, and the edit
/// constraints captured at build time. The tree owns its children; there
/// are no back-pointers.
#[derive(Debug, Clone)]
pub struct GeoNode {
    pub(crate) id: u64,
    pub(crate) labels: Vec<String>,
    pub(crate) total: i64,
    pub(crate) vector: Vec<i64>,
    pub(crate) reference: Option<Vec<i64>>,
    pub(crate) state: NodeState,
    pub(crate) constraints: Vec<EditConstraint>,
    pub(crate) children: Vec<GeoNode>,
}

impl GeoNode {
    /// Get the node id (root is the sentinel 0).
    #[inline] pub fn id(&self) -> u64 { self.id }

    /// Get the geographic labels naming this cell, coarsest first.
    #[inline] pub fn labels(&self) -> &[String] { &self.labels }

    /// Get the record count captured at build time.
    #[inline] pub fn total(&self) -> i64 { self.total }

    /// Get the contingency vector.
    #[inline] pub fn vector(&self) -> &[i64] { &self.vector }

    /// Get the snapshot taken before measurement, if any.
    #[inline] pub fn reference(&self) -> Option<&[i64]> { self.reference.as_deref() }

    /// Get the lifecycle state.
    #[inline] pub fn state(&self) -> NodeState { self.state }

    /// Get the node-local edit constraints.
    #[inline] pub fn constraints(&self) -> &[EditConstraint] { &self.constraints }

    /// Get the child nodes in build order.
    #[inline] pub fn children(&self) -> &[GeoNode] { &self.children }

    /// Check if the node is a leaf.
    #[inline] pub fn is_leaf(&self) -> bool { self.children.is_empty() }

    /// Count the nodes of the subtree rooted here.
    pub fn count_nodes(&self) -> usize {
        1 + self.children.iter().map(GeoNode::count_nodes).sum::<usize>()
    }

    /// Breadth-first traversal grouped by depth: one `(depth, nodes)` pair
    /// per level present in the tree, root at depth 0.
    pub fn iterate_by_levels(&self) -> Vec<(usize, Vec<&GeoNode>)> {
        let mut levels: Vec<(usize, Vec<&GeoNode>)> = Vec::new();
        let mut queue: VecDeque<(usize, &GeoNode)> = VecDeque::new();
        queue.push_back((0, self));

        while let Some((depth, node)) = queue.pop_front() {
            if levels.len() == depth {
                levels.push((depth, Vec::new()));
            }
            levels[depth].1.push(node);
            for child in &node.children {
                queue.push_back((depth + 1, child));
            }
        }
        levels
    }

    /// Child-index paths of every node, grouped by depth. The paths stay
    /// valid while the tree shape is unchanged, so callers can revisit
    /// nodes mutably level by level.
    pub fn level_paths(&self) -> Vec<Vec<Vec<usize>>> {
        let mut levels: Vec<Vec<Vec<usize>>> = Vec::new();
        let mut queue: VecDeque<(usize, Vec<usize>, &GeoNode)> = VecDeque::new();
        queue.push_back((0, Vec::new(), self));

        while let Some((depth, path, node)) = queue.pop_front() {
            if levels.len() == depth {
                levels.push(Vec::new());
            }
            for (i, child) in node.children.iter().enumerate() {
                let mut child_path = path.clone();
                child_path.push(i);
                queue.push_back((depth + 1, child_path, child));
            }
            levels[depth].push(path);
        }
        levels
    }

    /// Resolve a child-index path from this node.
    pub fn node_at(&self, path: &[usize]) -> &GeoNode {
        let mut node = self;
        for &i in path {
            node = &node.children[i];
        }
        node
    }

    /// Resolve a child-index path from this node, mutably.
    pub fn node_at_mut(&mut self, path: &[usize]) -> &mut GeoNode {
        let mut node = self;
        for &i in path {
            node = &mut node.children[i];
        }
        node
    }

    /// Snapshot every vector into its node's reference slot (used for
    /// distance diagnostics after the pipeline mutates the vectors).
    pub fn snapshot_reference(&mut self) {
        self.reference = Some(self.vector.clone());
        for child in &mut self.children {
            child.snapshot_reference();
        }
    }
}
