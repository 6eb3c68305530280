//! # Lifeverse - Seeded Multiverse Simulation for Personal State
//!
//! Lifeverse explores "what if" questions about a nine-metric personal state
//! (energy, focus, mood, stress, sleep, social, productivity, health, cash
//! flow). It pairs two subsystems:
//!
//! - **Influence trainer**: turns a sparse checkin history into a directed,
//!   weighted influence graph using lagged ridge regression with walk-forward
//!   alpha selection, plus a stability score per edge.
//! - **Multiverse simulator**: propagates a baseline forward under that graph,
//!   a regime-switching Markov chain and configurable shocks, then aggregates
//!   thousands of seeded paths into quantile bands, outcome branches and tail
//!   statistics.
//!
//! Everything is deterministic: the same inputs and seed yield a bit-identical
//! result.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lifeverse::{
//!     run_multiverse, Impulse, InfluenceMatrix, MetricId, MetricVector, MultiverseConfig, NoHooks,
//!     ReferenceScoring,
//! };
//!
//! let matrix = InfluenceMatrix::zeros().with_edge(MetricId::SleepHours, MetricId::Energy, 0.6);
//! let config = MultiverseConfig::new(MetricVector::default(), matrix)
//!     .runs(2000)
//!     .horizon_days(14)
//!     .impulse(Impulse::new(0, MetricId::SleepHours, 1.0));
//!
//! let result = run_multiverse(&config, &ReferenceScoring, &NoHooks)?;
//! println!("median index on the last day: {:?}", result.quantiles.index.p50.last());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod checkin;
pub mod error;
pub mod influence;
pub mod metric;

// Numerical leaves
pub mod linalg;
pub mod rng;

// Subsystems
pub mod runtime;
pub mod simulation;
pub mod training;

// Re-export primary types at crate root for convenience
pub use checkin::CheckinRecord;
pub use error::{ExecutionError, LifeverseError, LifeverseResult, ValidationError};
pub use influence::{resolve_active_matrix, InfluenceMatrix, StabilityLevel, StabilityMatrix, WeightsSource};
pub use metric::{MetricDelta, MetricId, MetricSpec, MetricVector, METRIC_COUNT};
pub use rng::{derive_lane_seed, Mulberry32};

pub use runtime::{RuntimeConfig, SimulationEvent, SimulationHandle, SimulationRuntime, TrainingHandle};
pub use simulation::{
    run_multiverse, run_multiverse_laned, BranchId, BranchSummary, CancelFlag, GoalWeights, Impulse,
    MultiverseConfig, MultiverseRunResult, NoHooks, Path, PathPoint, ReferenceScoring, RiskLevel, ShockMode,
    SimulationHooks, StateScoring, Toggles, TransitionMatrix,
};
pub use training::{
    learn_influence_edges, learned_matrix_key, train_learned_matrix, EdgeLearnOptions, EdgeMethod, LearnedEdge,
    LearnedMatrix, TrainerOptions, TrainingWindow,
};
