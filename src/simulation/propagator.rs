//! Single-path propagation.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::influence::{round4, InfluenceMatrix, StabilityMatrix};
use crate::metric::{MetricDelta, MetricId, MetricVector};
use crate::rng::Mulberry32;

use super::config::{Impulse, MultiverseConfig};
use super::regime::{collapse_offset, sample_transition, RegimeId};
use super::result::{Path, PathPoint, RiskLevel};
use super::scoring::{StateScoring, StateSnapshot};

/// Stability assumed for every edge when none is supplied.
pub const DEFAULT_STABILITY: f64 = 0.5;
/// Narrowest weight-noise half-width.
pub const MIN_WEIGHT_SIGMA: f64 = 0.01;

const ENERGY_NOISE: f64 = 0.06;
const MOOD_NOISE: f64 = 0.04;
const STRESS_NOISE: f64 = -0.05;

/// Impulses grouped by the day they apply on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpulseSchedule {
    by_day: BTreeMap<usize, MetricDelta>,
}

impl ImpulseSchedule {
    /// Group impulses by day, folding day 0 into day 1.
    #[must_use]
    pub fn new(impulses: &[Impulse]) -> Self {
        let mut by_day: BTreeMap<usize, MetricDelta> = BTreeMap::new();
        for impulse in impulses {
            by_day
                .entry(impulse.day.max(1))
                .or_default()
                .add(impulse.metric, impulse.delta);
        }
        Self { by_day }
    }

    /// Combined impulses for `day`; empty when nothing is scheduled.
    #[must_use]
    pub fn for_day(&self, day: usize) -> Cow<'_, MetricDelta> {
        self.by_day
            .get(&day)
            .map_or_else(|| Cow::Owned(MetricDelta::new()), Cow::Borrowed)
    }
}

/// Copy of `matrix` with per-edge additive noise.
///
/// Each edge draws `(u - 0.5) * 2 * sigma` where
/// `sigma = max(0.01, (1 - stability) * 0.2)`, in catalogue order.
pub fn perturb_matrix(
    matrix: &InfluenceMatrix,
    stability: Option<&StabilityMatrix>,
    rng: &mut Mulberry32,
) -> InfluenceMatrix {
    let mut out = InfluenceMatrix::zeros();
    for from in MetricId::ALL {
        for to in MetricId::ALL {
            let st = stability.map_or(DEFAULT_STABILITY, |s| s.get(from, to));
            let sigma = ((1.0 - st) * 0.2).max(MIN_WEIGHT_SIGMA);
            let noise = (rng.next_unit() - 0.5) * 2.0 * sigma;
            out.set(from, to, round4((matrix.get(from, to) + noise).clamp(-1.0, 1.0)));
        }
    }
    out
}

fn sanitize_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Advances one metric vector through the horizon.
pub struct PathPropagator<'a, S: StateScoring + ?Sized> {
    config: &'a MultiverseConfig,
    scoring: &'a S,
    schedule: &'a ImpulseSchedule,
    matrix: Cow<'a, InfluenceMatrix>,
    vector: MetricVector,
    regime: RegimeId,
    day: usize,
}

impl<'a, S: StateScoring + ?Sized> PathPropagator<'a, S> {
    /// Start a path at the baseline.
    ///
    /// With weight noise enabled this consumes one draw per matrix edge.
    pub fn new(
        config: &'a MultiverseConfig,
        scoring: &'a S,
        schedule: &'a ImpulseSchedule,
        rng: &mut Mulberry32,
    ) -> Self {
        let matrix = if config.toggles.weights_noise {
            Cow::Owned(perturb_matrix(&config.matrix, config.stability.as_ref(), rng))
        } else {
            Cow::Borrowed(&config.matrix)
        };
        Self {
            config,
            scoring,
            schedule,
            matrix,
            vector: config.base_vector,
            regime: config.base_regime,
            day: 0,
        }
    }

    /// Current metric vector.
    #[must_use]
    pub fn vector(&self) -> &MetricVector {
        &self.vector
    }

    /// Matrix this path propagates with.
    #[must_use]
    pub fn matrix(&self) -> &InfluenceMatrix {
        &self.matrix
    }

    /// Current regime.
    #[must_use]
    pub fn regime(&self) -> RegimeId {
        self.regime
    }

    /// Simulate one more day.
    pub fn step(&mut self, rng: &mut Mulberry32) -> PathPoint {
        self.day += 1;
        let config = self.config;

        let scale = config.shock_mode.scale(rng);
        let residuals = &config.forecast_residuals;
        let noise = if config.toggles.forecast_noise && scale > 0.0 && !residuals.is_empty() {
            // Truncation picks a uniform index; the min guards u == 1.0 rounding.
            let pick = ((rng.next_unit() * residuals.len() as f64) as usize).min(residuals.len() - 1);
            residuals[pick] * scale
        } else {
            0.0
        };

        let impulses = self.schedule.for_day(self.day);
        let mut next = self.scoring.propagate(&self.vector, &impulses, &self.matrix);
        if noise != 0.0 {
            next.nudge(MetricId::Energy, noise * ENERGY_NOISE);
            next.nudge(MetricId::Mood, noise * MOOD_NOISE);
            next.nudge(MetricId::Stress, noise * STRESS_NOISE);
        }
        self.vector = next;

        if config.toggles.stochastic_regime {
            self.regime = sample_transition(rng, self.regime, &config.transition_matrix);
        }

        let index = self.scoring.index_of(&self.vector);
        let snapshot = StateSnapshot {
            day: self.day,
            index,
            volatility: noise.abs(),
            regime: self.regime,
        };
        let assessed = self.scoring.assess_collapse(&snapshot, &self.vector).p_collapse;
        let p_collapse = round4(sanitize_probability(assessed + collapse_offset(self.regime)));

        PathPoint {
            day: self.day,
            index: round4(index),
            p_collapse,
            risk: RiskLevel::from_p_collapse(p_collapse),
            goal_score: self.scoring.goal_score(&self.vector, config.goal_weights.as_ref()),
            regime: self.regime,
        }
    }

    /// Simulate the full horizon.
    pub fn run(mut self, rng: &mut Mulberry32) -> Path {
        (0..self.config.horizon_days).map(|_| self.step(rng)).collect()
    }
}
