//! Learning influence graphs from checkin history.
//!
//! The main entry point is [`train_learned_matrix`]: densify, window, z-score,
//! lag, choose a ridge strength by walk-forward validation, fit, normalise, and
//! score stability. [`learn_influence_edges`] offers lighter edge-list
//! estimators over raw day-over-day deltas.

pub mod correlation;
pub mod dense;
pub mod ridge;
pub mod trainer;

pub use correlation::{learn_influence_edges, EdgeLearnOptions, EdgeMethod, LearnedEdge};
pub use dense::{z_score, DenseSeries};
pub use ridge::{choose_alpha, fit_ridge, train_ridge_matrix, LaggedDataset, RidgeFit, ALPHA_GRID, MIN_ROWS};
pub use trainer::{
    compute_stability, learned_matrix_key, minimum_days, stability_score, train_learned_matrix,
    LearnedMatrix, LearnedMatrixMeta, TrainerOptions, TrainingWindow,
};
