mod build;
mod node;

pub use build::{build, build_resumed, GeoConstraints};
pub use node::{GeoNode, NodeState};

#[cfg(test)]
pub(crate) use node::testutil;
