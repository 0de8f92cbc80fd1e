mod sampler;

use std::collections::VecDeque;

use anyhow::{ensure, Result};
use rand::Rng;
use serde::Deserialize;

use crate::tree::{GeoNode, NodeState};

pub use sampler::{sample_discrete_gaussian, sample_discrete_laplace};

/// The configured noise mechanism, before a per-level privacy parameter is
/// attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismKind {
    DiscreteGaussian,
    DiscreteLaplace,
}

impl MechanismKind {
    /// Attach a privacy parameter, yielding a samplable mechanism.
    pub fn with_parameter(self, parameter: f64) -> Mechanism {
        match self {
            MechanismKind::DiscreteGaussian => Mechanism::DiscreteGaussian { rho: parameter },
            MechanismKind::DiscreteLaplace => Mechanism::DiscreteLaplace { epsilon: parameter },
        }
    }

    /// Short name for reporting.
    pub fn name(&self) -> &'static str {
        match self {
            MechanismKind::DiscreteGaussian => "discrete_gaussian",
            MechanismKind::DiscreteLaplace => "discrete_laplace",
        }
    }
}

/// A discrete noise mechanism bound to its privacy parameter.
///
/// The Gaussian binding is the zCDP one for sensitivity-1 counts
/// (`σ² = 1/(2ρ)`); the Laplace sampler takes a scale and is invoked with
/// `1/ε`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mechanism {
    DiscreteGaussian { rho: f64 },
    DiscreteLaplace { epsilon: f64 },
}

impl Mechanism {
    /// Draw one integer noise sample.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        match self {
            Mechanism::DiscreteGaussian { rho } => {
                sampler::sample_discrete_gaussian(rng, 1.0 / (2.0 * rho))
            }
            Mechanism::DiscreteLaplace { epsilon } => {
                sampler::sample_discrete_laplace(rng, epsilon.recip())
            }
        }
    }
}

/// Add independent noise to every cell of every node, breadth-first, with
/// the privacy parameter of the node's depth.
pub fn perturb<R: Rng + ?Sized>(
    root: &mut GeoNode,
    kind: MechanismKind,
    parameters: &[f64],
    rng: &mut R,
) -> Result<()> {
    perturb_from(root, kind, parameters, 0, rng)
}

/// Like [`perturb`], but leaves levels shallower than `start_depth`
/// untouched (the resume path: checkpointed levels already carry their
/// noise).
pub fn perturb_from<R: Rng + ?Sized>(
    root: &mut GeoNode,
    kind: MechanismKind,
    parameters: &[f64],
    start_depth: usize,
    rng: &mut R,
) -> Result<()> {
    let mut queue: VecDeque<(usize, &mut GeoNode)> = VecDeque::new();
    queue.push_back((0, root));

    while let Some((depth, node)) = queue.pop_front() {
        if depth >= start_depth {
            ensure!(
                depth < parameters.len(),
                "[noise] no privacy parameter for depth {depth}"
            );
            let mechanism = kind.with_parameter(parameters[depth]);
            for cell in node.vector.iter_mut() {
                *cell += mechanism.sample(rng);
            }
            node.state = NodeState::Noisy;
        }
        for child in node.children.iter_mut() {
            queue.push_back((depth + 1, child));
        }
    }
    Ok(())
}
