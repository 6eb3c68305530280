//! Simulation batch configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, ensure_in_range, ValidationError};
use crate::influence::{resolve_active_matrix, InfluenceMatrix, StabilityMatrix, WeightsSource};
use crate::metric::{MetricId, MetricVector};
use crate::rng::Mulberry32;

use super::regime::{RegimeId, TransitionMatrix};

/// Probability that a black-swan day draws the heavy-tail multiplier.
pub const BLACK_SWAN_PROBABILITY: f64 = 0.08;
/// Heavy-tail shock multiplier.
pub const BLACK_SWAN_HEAVY_SCALE: f64 = 3.2;
/// Ordinary black-swan-mode shock multiplier.
pub const BLACK_SWAN_BASE_SCALE: f64 = 1.2;

/// Shock profile applied to forecast residual noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShockMode {
    /// No noise, whatever the toggles say.
    Off,
    /// Residuals at face value.
    #[default]
    Normal,
    /// Amplified residuals with a rare heavy-tail day.
    BlackSwan,
}

impl ShockMode {
    /// Multiplier for one simulated day.
    ///
    /// Only `BlackSwan` consumes a draw.
    pub fn scale(self, rng: &mut Mulberry32) -> f64 {
        match self {
            Self::Off => 0.0,
            Self::Normal => 1.0,
            Self::BlackSwan => {
                if rng.next_unit() > 1.0 - BLACK_SWAN_PROBABILITY {
                    BLACK_SWAN_HEAVY_SCALE
                } else {
                    BLACK_SWAN_BASE_SCALE
                }
            }
        }
    }
}

/// Per-feature stochastic toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggles {
    /// Perturb the influence matrix once per path.
    pub weights_noise: bool,
    /// Nudge energy, mood and stress with sampled residuals.
    pub forecast_noise: bool,
    /// Resample the regime every day.
    pub stochastic_regime: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self::all()
    }
}

impl Toggles {
    /// Every stochastic feature enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            weights_noise: true,
            forecast_noise: true,
            stochastic_regime: true,
        }
    }

    /// Every stochastic feature disabled.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            weights_noise: false,
            forecast_noise: false,
            stochastic_regime: false,
        }
    }
}

/// A scheduled external nudge. Day 0 lands before day 1 propagation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Impulse {
    /// Day the impulse applies on.
    pub day: usize,
    /// Target metric.
    pub metric: MetricId,
    /// Additive change, clamped with the metric.
    pub delta: f64,
}

impl Impulse {
    /// Build an impulse.
    #[must_use]
    pub const fn new(day: usize, metric: MetricId, delta: f64) -> Self {
        Self { day, metric, delta }
    }
}

/// Goal weighting over metrics. Missing metrics weigh zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalWeights(BTreeMap<MetricId, f64>);

impl GoalWeights {
    /// Empty weighting.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style weight assignment.
    #[must_use]
    pub fn with(mut self, metric: MetricId, weight: f64) -> Self {
        self.0.insert(metric, weight);
        self
    }

    /// Weight of `metric`, zero if unset.
    #[must_use]
    pub fn get(&self, metric: MetricId) -> f64 {
        self.0.get(&metric).copied().unwrap_or(0.0)
    }

    /// Set weights in metric order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricId, f64)> + '_ {
        self.0.iter().map(|(m, w)| (*m, *w))
    }

    /// Sum of absolute weights.
    #[must_use]
    pub fn total_abs(&self) -> f64 {
        self.0.values().map(|w| w.abs()).sum()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for (metric, weight) in &self.0 {
            ensure_finite(&format!("goal_weights.{metric}"), *weight)?;
        }
        Ok(())
    }
}

/// Immutable input bundle for one simulation batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiverseConfig {
    /// Number of independent paths.
    pub runs: usize,
    /// Simulated days per path.
    pub horizon_days: usize,
    /// Seed of the path RNG stream.
    pub seed: u32,
    /// Day-0 metric values.
    pub base_vector: MetricVector,
    /// Regime every path starts in.
    pub base_regime: RegimeId,
    /// Active influence weights.
    pub matrix: InfluenceMatrix,
    /// Edge stability; scales weight noise. Absent means 0.5 everywhere.
    #[serde(default)]
    pub stability: Option<StabilityMatrix>,
    /// Regime Markov chain.
    #[serde(default)]
    pub transition_matrix: TransitionMatrix,
    /// Forecast noise amplitude regime.
    #[serde(default)]
    pub shock_mode: ShockMode,
    /// Noise and regime switches.
    #[serde(default)]
    pub toggles: Toggles,
    /// Index level hedges try to keep the path above.
    pub index_floor: f64,
    /// Collapse probability ceiling in percent, used for hedge ranking.
    pub collapse_constraint_pct: f64,
    /// Weighting for the goal score; absent disables it.
    #[serde(default)]
    pub goal_weights: Option<GoalWeights>,
    /// Scheduled impulses.
    #[serde(default)]
    pub impulses: Vec<Impulse>,
    /// Historical one-day forecast residuals sampled by forecast noise.
    #[serde(default)]
    pub forecast_residuals: Vec<f64>,
    /// Provenance of `matrix`, carried into the audit block.
    #[serde(default)]
    pub weights_source: WeightsSource,
    /// Learned share when `weights_source` is mixed.
    #[serde(default)]
    pub mix: f64,
}

impl MultiverseConfig {
    /// Defaults: 1000 runs over 7 days, seed 42, calm regime 0.
    #[must_use]
    pub fn new(base_vector: MetricVector, matrix: InfluenceMatrix) -> Self {
        Self {
            runs: 1000,
            horizon_days: 7,
            seed: 42,
            base_vector,
            base_regime: 0,
            matrix,
            stability: None,
            transition_matrix: TransitionMatrix::default(),
            shock_mode: ShockMode::Normal,
            toggles: Toggles::default(),
            index_floor: 5.0,
            collapse_constraint_pct: 35.0,
            goal_weights: None,
            impulses: Vec::new(),
            forecast_residuals: Vec::new(),
            weights_source: WeightsSource::Manual,
            mix: 0.0,
        }
    }

    /// Start from whichever matrix `source` selects.
    pub fn from_weights(
        base_vector: MetricVector,
        source: WeightsSource,
        manual: &InfluenceMatrix,
        learned: &InfluenceMatrix,
        mix: f64,
    ) -> Result<Self, ValidationError> {
        let matrix = resolve_active_matrix(source, manual, learned, mix)?;
        let mut config = Self::new(base_vector, matrix);
        config.weights_source = source;
        config.mix = mix;
        Ok(config)
    }

    /// Set the number of paths.
    #[must_use]
    pub fn runs(mut self, runs: usize) -> Self {
        self.runs = runs;
        self
    }

    /// Set the horizon in days.
    #[must_use]
    pub fn horizon_days(mut self, days: usize) -> Self {
        self.horizon_days = days;
        self
    }

    /// Set the RNG seed.
    #[must_use]
    pub fn seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    /// Set the starting regime.
    #[must_use]
    pub fn base_regime(mut self, regime: RegimeId) -> Self {
        self.base_regime = regime;
        self
    }

    /// Set per-edge stability.
    #[must_use]
    pub fn stability(mut self, stability: StabilityMatrix) -> Self {
        self.stability = Some(stability);
        self
    }

    /// Replace the regime chain.
    #[must_use]
    pub fn transition_matrix(mut self, matrix: TransitionMatrix) -> Self {
        self.transition_matrix = matrix;
        self
    }

    /// Set the shock mode.
    #[must_use]
    pub fn shock_mode(mut self, mode: ShockMode) -> Self {
        self.shock_mode = mode;
        self
    }

    /// Set the noise toggles.
    #[must_use]
    pub fn toggles(mut self, toggles: Toggles) -> Self {
        self.toggles = toggles;
        self
    }

    /// Set the hedge index floor.
    #[must_use]
    pub fn index_floor(mut self, floor: f64) -> Self {
        self.index_floor = floor;
        self
    }

    /// Set the collapse ceiling, in percent.
    #[must_use]
    pub fn collapse_constraint_pct(mut self, pct: f64) -> Self {
        self.collapse_constraint_pct = pct;
        self
    }

    /// Enable goal scoring with `weights`.
    #[must_use]
    pub fn goal_weights(mut self, weights: GoalWeights) -> Self {
        self.goal_weights = Some(weights);
        self
    }

    /// Append one scheduled impulse.
    #[must_use]
    pub fn impulse(mut self, impulse: Impulse) -> Self {
        self.impulses.push(impulse);
        self
    }

    /// Residual pool for forecast noise.
    #[must_use]
    pub fn forecast_residuals(mut self, residuals: Vec<f64>) -> Self {
        self.forecast_residuals = residuals;
        self
    }

    /// Validate the configuration.
    ///
    /// Must pass before any run starts; simulation itself never fails on
    /// runtime values.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.runs == 0 {
            return Err(ValidationError::ZeroRuns);
        }
        if self.horizon_days == 0 {
            return Err(ValidationError::ZeroHorizon);
        }
        self.transition_matrix.validate()?;
        if usize::from(self.base_regime) >= self.transition_matrix.regimes() {
            return Err(ValidationError::RegimeOutOfRange {
                regime: self.base_regime,
                regimes: self.transition_matrix.regimes(),
            });
        }
        ensure_finite("index_floor", self.index_floor)?;
        ensure_in_range("collapse_constraint_pct", self.collapse_constraint_pct, 0.0, 100.0)?;
        ensure_in_range("mix", self.mix, 0.0, 1.0)?;
        for impulse in &self.impulses {
            ensure_finite(&format!("impulses.{}", impulse.metric), impulse.delta)?;
        }
        for residual in &self.forecast_residuals {
            ensure_finite("forecast_residuals", *residual)?;
        }
        if let Some(weights) = &self.goal_weights {
            weights.validate()?;
        }
        Ok(())
    }

    /// Stable content hash of the configuration (hex).
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"lifeverse.config.v1");
        match serde_json::to_vec(self) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(format!("{self:?}").as_bytes()),
        };
        hasher.finalize().to_hex().to_string()
    }
}
