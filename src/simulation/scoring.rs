//! State scoring collaborator.
//!
//! The simulator never hard-codes how a metric vector is propagated or scored.
//! It calls a [`StateScoring`] implementation, treated as a set of pure
//! functions. [`ReferenceScoring`] is the deterministic implementation shipped
//! with the crate.

use serde::{Deserialize, Serialize};

use crate::influence::InfluenceMatrix;
use crate::metric::{MetricDelta, MetricId, MetricVector};

use super::config::GoalWeights;
use super::regime::RegimeId;

/// Fuller state passed to collapse assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Simulated day (0 = baseline).
    pub day: usize,
    /// Composite index of the vector being assessed.
    pub index: f64,
    /// Magnitude of today's forecast noise.
    pub volatility: f64,
    /// Regime the path is in.
    pub regime: RegimeId,
}

impl StateSnapshot {
    /// Snapshot of an undisturbed baseline.
    #[must_use]
    pub const fn baseline(index: f64, regime: RegimeId) -> Self {
        Self {
            day: 0,
            index,
            volatility: 0.0,
            regime,
        }
    }
}

/// Collapse risk estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollapseAssessment {
    /// Probability in [0, 1].
    pub p_collapse: f64,
}

/// A candidate single-metric corrective action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hedge {
    /// Metric to move.
    pub metric: MetricId,
    /// Suggested change.
    pub delta: f64,
    /// Short rationale.
    pub note: String,
    /// Composite index after applying the hedge for one step.
    pub expected_index: f64,
    /// Collapse probability after applying the hedge for one step.
    pub expected_p_collapse: f64,
}

/// Pure scoring functions the simulator depends on.
pub trait StateScoring: Send + Sync {
    /// One deterministic, bounded propagation step.
    fn propagate(&self, vector: &MetricVector, impulses: &MetricDelta, matrix: &InfluenceMatrix) -> MetricVector;

    /// Composite wellbeing index.
    fn index_of(&self, vector: &MetricVector) -> f64;

    /// Collapse risk for a vector in context.
    fn assess_collapse(&self, snapshot: &StateSnapshot, vector: &MetricVector) -> CollapseAssessment;

    /// Ranked corrective actions, best first.
    fn rank_hedges(
        &self,
        base: &MetricVector,
        matrix: &InfluenceMatrix,
        index_floor: f64,
        collapse_constraint_pct: f64,
    ) -> Vec<Hedge>;

    /// Alignment with a goal weighting, if one is defined.
    fn goal_score(&self, vector: &MetricVector, weights: Option<&GoalWeights>) -> Option<f64>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Fraction of a source's impulse-free deviation transferred per day.
const DRIFT_GAIN: f64 = 0.05;
/// Largest propagated step, as a fraction of the target span.
const STEP_CAP: f64 = 0.25;
/// Sleep duration scored as ideal.
const IDEAL_SLEEP_HOURS: f64 = 8.0;
/// Sleep below this counts as deficit.
const SLEEP_DEFICIT_HOURS: f64 = 7.0;
/// Maximum hedges returned.
const HEDGE_LIMIT: usize = 3;

/// Deterministic reference scoring.
///
/// Propagation adds the impulses, moves each target by the one-hop matrix
/// transfer of those impulses (rescaled between metric spans), and adds a
/// small pull from every source's deviation from the default vector. The
/// propagated part of each step is capped at a quarter of the target span.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceScoring;

impl ReferenceScoring {
    fn hedge_step(metric: MetricId) -> f64 {
        let step = metric.spec().step;
        if step > 0.0 {
            step
        } else {
            metric.span() / 10.0
        }
    }

    fn score(&self, vector: &MetricVector, regime: RegimeId) -> (f64, f64) {
        let index = self.index_of(vector);
        let p = self
            .assess_collapse(&StateSnapshot::baseline(index, regime), vector)
            .p_collapse;
        (index, p)
    }
}

impl StateScoring for ReferenceScoring {
    fn propagate(&self, vector: &MetricVector, impulses: &MetricDelta, matrix: &InfluenceMatrix) -> MetricVector {
        let neutral = MetricVector::default();
        let mut next = *vector;

        for to in MetricId::ALL {
            let mut propagated = 0.0;
            for from in MetricId::ALL {
                let weight = matrix.get(from, to);
                if weight == 0.0 {
                    continue;
                }
                let ratio = to.span() / from.span();
                propagated += weight * impulses.get(from) * ratio;
                let deviation = (vector.get(from) - neutral.get(from)) / from.span();
                propagated += DRIFT_GAIN * weight * deviation * to.span();
            }
            let cap = STEP_CAP * to.span();
            let step = impulses.get(to) + propagated.clamp(-cap, cap);
            next.set(to, vector.get(to) + step);
        }

        next
    }

    fn index_of(&self, vector: &MetricVector) -> f64 {
        let positive: f64 = [
            MetricId::Energy,
            MetricId::Focus,
            MetricId::Mood,
            MetricId::Social,
            MetricId::Productivity,
            MetricId::Health,
        ]
        .into_iter()
        .map(|m| vector.get(m))
        .sum();
        let calm = 10.0 - vector.get(MetricId::Stress);
        let sleep = (10.0 - (vector.get(MetricId::SleepHours) - IDEAL_SLEEP_HOURS).abs() * 2.5).clamp(0.0, 10.0);
        ((positive + calm + sleep) / 8.0).clamp(0.0, 10.0)
    }

    fn assess_collapse(&self, snapshot: &StateSnapshot, vector: &MetricVector) -> CollapseAssessment {
        let shortfall = 6.0 - snapshot.index;
        let stress = vector.get(MetricId::Stress) - 5.0;
        let sleep_deficit = (SLEEP_DEFICIT_HOURS - vector.get(MetricId::SleepHours)).max(0.0);
        let z = -2.0 + 0.6 * shortfall + 0.25 * stress + 0.3 * sleep_deficit + 0.5 * snapshot.volatility;
        CollapseAssessment {
            p_collapse: 1.0 / (1.0 + (-z).exp()),
        }
    }

    fn rank_hedges(
        &self,
        base: &MetricVector,
        matrix: &InfluenceMatrix,
        index_floor: f64,
        collapse_constraint_pct: f64,
    ) -> Vec<Hedge> {
        let (base_index, base_p) = self.score(base, 0);
        let mut scored: Vec<(f64, Hedge)> = Vec::new();

        for metric in MetricId::ALL {
            if metric == MetricId::CashFlow {
                continue;
            }
            let step = Self::hedge_step(metric);
            for delta in [step, -step] {
                let moved = self.propagate(base, &MetricDelta::from_iter([(metric, delta)]), matrix);
                let (index, p) = self.score(&moved, 0);
                let gain = (index - base_index) + 10.0 * (base_p - p);
                if gain <= 1e-9 {
                    continue;
                }
                let meets = index >= index_floor && p * 100.0 <= collapse_constraint_pct;
                let note = format!(
                    "{} {delta:+}: index {:+.2}, collapse {:+.1} pp{}",
                    metric.spec().label,
                    index - base_index,
                    (p - base_p) * 100.0,
                    if meets { ", meets floor and constraint" } else { "" }
                );
                scored.push((
                    gain,
                    Hedge {
                        metric,
                        delta,
                        note,
                        expected_index: index,
                        expected_p_collapse: p,
                    },
                ));
            }
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(HEDGE_LIMIT).map(|(_, h)| h).collect()
    }

    fn goal_score(&self, vector: &MetricVector, weights: Option<&GoalWeights>) -> Option<f64> {
        let weights = weights?;
        let total = weights.total_abs();
        if total <= f64::EPSILON {
            return None;
        }
        let sum: f64 = weights.iter().map(|(m, w)| w * m.normalize(vector.get(m))).sum();
        Some(sum / total * 100.0)
    }

    fn name(&self) -> &'static str {
        "reference"
    }
}
