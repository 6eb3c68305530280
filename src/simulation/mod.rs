//! Stochastic multiverse path simulation.
//!
//! A batch runs many independent paths from one baseline. Each path perturbs
//! the influence matrix, applies scheduled impulses, injects shock-scaled
//! residual noise and walks a regime chain; the batch is then aggregated into
//! quantile bands, outcome branches, tail statistics and path subsets.
//!
//! Scoring (propagation, index, collapse, hedges, goals) is delegated to a
//! [`StateScoring`] collaborator.

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod propagator;
pub mod regime;
pub mod result;
pub mod scoring;

pub use aggregate::quantile;
pub use config::{GoalWeights, Impulse, MultiverseConfig, ShockMode, Toggles};
pub use engine::{run_multiverse, run_multiverse_laned, CancelFlag, NoHooks, SimulationHooks, PROGRESS_INTERVAL};
pub use propagator::{perturb_matrix, ImpulseSchedule, PathPropagator};
pub use regime::{collapse_offset, sample_transition, RegimeId, TransitionMatrix, MAX_REGIMES};
pub use result::{
    ActionLever, Audit, BranchId, BranchSummary, Distributions, MultiverseRunResult, Path, PathPoint,
    QuantileBand, Quantiles, RegimeSnapshot, RiskLevel, RunId, TailSummary, TrajectoryExplorer,
};
pub use scoring::{CollapseAssessment, Hedge, ReferenceScoring, StateScoring, StateSnapshot};
