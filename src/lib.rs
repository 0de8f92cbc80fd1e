#![doc = "TopDown synthetic-microdata public API"]

pub mod cli;
pub mod commands;

mod check;
mod config;
mod constraint;
mod estimate;
mod metrics;
mod microdata;
mod noise;
mod pipeline;
mod schema;
mod solve;
mod tree;

#[doc(inline)]
pub use config::RunConfig;

#[doc(inline)]
pub use constraint::{ConstraintTemplate, EditConstraint};

#[doc(inline)]
pub use schema::{histogram, histogram_full, read_records, Permutation, RecordTable};

#[doc(inline)]
pub use tree::{build, build_resumed, GeoConstraints, GeoNode, NodeState};

#[doc(inline)]
pub use noise::{
    perturb, perturb_from, sample_discrete_gaussian, sample_discrete_laplace, Mechanism,
    MechanismKind,
};

#[doc(inline)]
pub use solve::{solve, LinearConstraint, Model, Outcome, Relation, SolveOptions, Variable};

#[doc(inline)]
pub use estimate::{estimate, estimate_from, EstimateOptions, EstimateReport};

#[doc(inline)]
pub use microdata::write_microdata;

#[doc(inline)]
pub use check::{verify, Violation, ViolationKind};

#[doc(inline)]
pub use metrics::DistanceMetric;

#[doc(inline)]
pub use pipeline::{compare, run, RunSummary};
