//! Influence and stability matrices over the metric catalogue.
//!
//! An influence matrix is a dense directed graph `from -> to` with weights in
//! [-1, 1]. A stability matrix has the same shape with scores in [0, 1] that
//! express how well short- and long-window fits of an edge agree.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, ensure_in_range, ValidationError};
use crate::metric::{MetricId, METRIC_COUNT};

type Grid = [[f64; METRIC_COUNT]; METRIC_COUNT];
type GridRepr = BTreeMap<MetricId, BTreeMap<MetricId, f64>>;

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn grid_to_repr(grid: &Grid) -> GridRepr {
    MetricId::ALL
        .into_iter()
        .map(|from| {
            let row = MetricId::ALL
                .into_iter()
                .map(|to| (to, grid[from.index()][to.index()]))
                .collect();
            (from, row)
        })
        .collect()
}

fn grid_from_repr(repr: &GridRepr, lo: f64, hi: f64) -> Result<Grid, ValidationError> {
    let mut grid = [[0.0; METRIC_COUNT]; METRIC_COUNT];
    for (from, row) in repr {
        for (to, value) in row {
            ensure_finite(&format!("{from}->{to}"), *value)?;
            grid[from.index()][to.index()] = value.clamp(lo, hi);
        }
    }
    Ok(grid)
}

/// Where the active influence weights come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightsSource {
    /// User-edited weights.
    #[default]
    Manual,
    /// Weights produced by the trainer.
    Learned,
    /// Convex blend of manual and learned.
    Mixed,
}

impl fmt::Display for WeightsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Learned => write!(f, "learned"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

/// Directed weighted influence graph.
///
/// Missing entries in the serialized form read as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridRepr", into = "GridRepr")]
pub struct InfluenceMatrix {
    weights: Grid,
}

impl Default for InfluenceMatrix {
    fn default() -> Self {
        Self::zeros()
    }
}

impl InfluenceMatrix {
    /// An all-zero matrix (no influence at all).
    #[must_use]
    pub const fn zeros() -> Self {
        Self {
            weights: [[0.0; METRIC_COUNT]; METRIC_COUNT],
        }
    }

    /// Build a matrix from `(from, to, weight)` triples; later entries overwrite earlier ones.
    pub fn from_edges(edges: impl IntoIterator<Item = (MetricId, MetricId, f64)>) -> Self {
        let mut matrix = Self::zeros();
        for (from, to, weight) in edges {
            matrix.set(from, to, weight);
        }
        matrix
    }

    /// Weight of the `from -> to` edge.
    #[must_use]
    pub fn get(&self, from: MetricId, to: MetricId) -> f64 {
        self.weights[from.index()][to.index()]
    }

    /// Set the `from -> to` weight, clamped into [-1, 1].
    pub fn set(&mut self, from: MetricId, to: MetricId, weight: f64) {
        let w = if weight.is_nan() { 0.0 } else { weight.clamp(-1.0, 1.0) };
        self.weights[from.index()][to.index()] = w;
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with_edge(mut self, from: MetricId, to: MetricId, weight: f64) -> Self {
        self.set(from, to, weight);
        self
    }

    /// Iterate every cell as `(from, to, weight)` in catalogue order.
    pub fn edges(&self) -> impl Iterator<Item = (MetricId, MetricId, f64)> + '_ {
        MetricId::ALL.into_iter().flat_map(move |from| {
            MetricId::ALL
                .into_iter()
                .map(move |to| (from, to, self.weights[from.index()][to.index()]))
        })
    }

    /// Largest absolute weight.
    #[must_use]
    pub fn max_abs(&self) -> f64 {
        self.edges().fold(0.0, |acc, (_, _, w)| acc.max(w.abs()))
    }

    /// Returns true if every weight is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.edges().all(|(_, _, w)| w == 0.0)
    }

    /// Elementwise `manual * (1 - mix) + learned * mix`, with `mix` clamped into [0, 1].
    #[must_use]
    pub fn blend(manual: &Self, learned: &Self, mix: f64) -> Self {
        let mix = if mix.is_nan() { 0.0 } else { mix.clamp(0.0, 1.0) };
        let mut out = Self::zeros();
        for (from, to, m) in manual.edges() {
            let l = learned.get(from, to);
            out.set(from, to, round4((1.0 - mix) * m + mix * l));
        }
        out
    }
}

impl TryFrom<GridRepr> for InfluenceMatrix {
    type Error = ValidationError;

    fn try_from(repr: GridRepr) -> Result<Self, Self::Error> {
        Ok(Self {
            weights: grid_from_repr(&repr, -1.0, 1.0)?,
        })
    }
}

impl From<InfluenceMatrix> for GridRepr {
    fn from(m: InfluenceMatrix) -> Self {
        grid_to_repr(&m.weights)
    }
}

/// Pick the matrix a simulation should use for the given source.
pub fn resolve_active_matrix(
    source: WeightsSource,
    manual: &InfluenceMatrix,
    learned: &InfluenceMatrix,
    mix: f64,
) -> Result<InfluenceMatrix, ValidationError> {
    ensure_in_range("mix", mix, 0.0, 1.0)?;
    Ok(match source {
        WeightsSource::Manual => manual.clone(),
        WeightsSource::Learned => learned.clone(),
        WeightsSource::Mixed => InfluenceMatrix::blend(manual, learned, mix),
    })
}

/// Coarse confidence bucket for a stability score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityLevel {
    /// Score of at least 0.75.
    High,
    /// Score of at least 0.45.
    Medium,
    /// Anything lower.
    Low,
}

impl StabilityLevel {
    /// Classify a score: >= 0.75 high, >= 0.45 medium, otherwise low.
    #[must_use]
    pub fn classify(score: f64) -> Self {
        if score >= 0.75 {
            Self::High
        } else if score >= 0.45 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Per-edge agreement between short- and long-window fits, in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridRepr", into = "GridRepr")]
pub struct StabilityMatrix {
    scores: Grid,
}

impl Default for StabilityMatrix {
    fn default() -> Self {
        Self::zeros()
    }
}

impl StabilityMatrix {
    /// An all-zero matrix.
    #[must_use]
    pub const fn zeros() -> Self {
        Self::uniform_unchecked(0.0)
    }

    /// Every edge carries the same score.
    #[must_use]
    pub fn uniform(score: f64) -> Self {
        Self::uniform_unchecked(if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) })
    }

    const fn uniform_unchecked(score: f64) -> Self {
        Self {
            scores: [[score; METRIC_COUNT]; METRIC_COUNT],
        }
    }

    /// Score of the `from -> to` edge.
    #[must_use]
    pub fn get(&self, from: MetricId, to: MetricId) -> f64 {
        self.scores[from.index()][to.index()]
    }

    /// Set the `from -> to` score, clamped into [0, 1].
    pub fn set(&mut self, from: MetricId, to: MetricId, score: f64) {
        let s = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        self.scores[from.index()][to.index()] = s;
    }

    /// Bucketed level of the `from -> to` edge.
    #[must_use]
    pub fn level(&self, from: MetricId, to: MetricId) -> StabilityLevel {
        StabilityLevel::classify(self.get(from, to))
    }

    /// Mean score across all cells.
    #[must_use]
    pub fn mean(&self) -> f64 {
        let total: f64 = self.scores.iter().flatten().sum();
        total / (METRIC_COUNT * METRIC_COUNT) as f64
    }
}

impl TryFrom<GridRepr> for StabilityMatrix {
    type Error = ValidationError;

    fn try_from(repr: GridRepr) -> Result<Self, Self::Error> {
        Ok(Self {
            scores: grid_from_repr(&repr, 0.0, 1.0)?,
        })
    }
}

impl From<StabilityMatrix> for GridRepr {
    fn from(m: StabilityMatrix) -> Self {
        grid_to_repr(&m.scores)
    }
}
