//! Edge-list learners over day-over-day deltas.
//!
//! These estimators work directly on consecutive checkins (no densification)
//! and report one edge per ordered pair of distinct metrics together with the
//! lag that explains it best. The baseline method is plain lagged Pearson
//! correlation; the advanced method fits a ridge regression per target.

use serde::{Deserialize, Serialize};

use crate::checkin::{sorted_by_time, CheckinRecord};
use crate::error::{ensure_finite, ValidationError};
use crate::influence::InfluenceMatrix;
use crate::linalg::Matrix;
use crate::metric::MetricId;

/// Estimator used for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMethod {
    /// Lagged correlation of deltas.
    #[default]
    BaselineCorrelation,
    /// Ridge regression of target deltas on lagged source deltas.
    AdvancedRidge,
}

/// One learned `from -> to` edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedEdge {
    /// Source metric.
    pub from: MetricId,
    /// Target metric.
    pub to: MetricId,
    /// Weight in [-1, 1].
    pub weight: f64,
    /// Lag (days) with the strongest signal.
    pub lag: u8,
    /// Heuristic confidence in [0, 1].
    pub confidence: f64,
    /// Learner that produced the edge.
    pub method: EdgeMethod,
}

/// Options for [`learn_influence_edges`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeLearnOptions {
    /// Candidate lags, each in 1..=3.
    pub lags: Vec<u8>,
    /// Which learner to run.
    pub method: EdgeMethod,
    /// Ridge strength for the advanced method.
    pub ridge_alpha: f64,
}

impl Default for EdgeLearnOptions {
    fn default() -> Self {
        Self {
            lags: vec![1, 2, 3],
            method: EdgeMethod::BaselineCorrelation,
            ridge_alpha: 1.2,
        }
    }
}

impl EdgeLearnOptions {
    /// Validate options.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.lags.is_empty() {
            return Err(ValidationError::InvalidLagOrder { lags: 0 });
        }
        if let Some(bad) = self.lags.iter().find(|l| !(1..=3).contains(*l)) {
            return Err(ValidationError::InvalidLagOrder { lags: *bad });
        }
        ensure_finite("ridge_alpha", self.ridge_alpha)
    }
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return 0.0;
    }
    cov / (var_x * var_y).sqrt()
}

fn deltas(sorted: &[&CheckinRecord], metric: MetricId) -> Vec<f64> {
    sorted
        .windows(2)
        .map(|w| w[1].values.get(metric) - w[0].values.get(metric))
        .collect()
}

fn lagged_correlation(source: &[f64], target: &[f64], lag: usize) -> (f64, usize) {
    if source.len() != target.len() || lag >= source.len() {
        return (0.0, 0);
    }
    let xs = &source[..source.len() - lag];
    let ys = &target[lag..];
    (pearson(xs, ys), xs.len())
}

/// Prefer larger |value|; on ties prefer the smaller lag.
fn beats(candidate: f64, candidate_lag: u8, best: f64, best_lag: u8) -> bool {
    candidate.abs() > best.abs() || (candidate.abs() == best.abs() && candidate_lag < best_lag)
}

fn learn_baseline(sorted: &[&CheckinRecord], metrics: &[MetricId], lags: &[u8]) -> Vec<LearnedEdge> {
    if sorted.len() < 3 {
        return Vec::new();
    }
    let by_metric: Vec<Vec<f64>> = metrics.iter().map(|m| deltas(sorted, *m)).collect();

    let mut edges = Vec::new();
    for (fi, from) in metrics.iter().enumerate() {
        for (ti, to) in metrics.iter().enumerate() {
            if fi == ti {
                continue;
            }
            let mut best_lag = lags[0];
            let mut best = lagged_correlation(&by_metric[fi], &by_metric[ti], usize::from(best_lag));
            for &lag in &lags[1..] {
                let candidate = lagged_correlation(&by_metric[fi], &by_metric[ti], usize::from(lag));
                if beats(candidate.0, lag, best.0, best_lag) {
                    best_lag = lag;
                    best = candidate;
                }
            }
            let weight = best.0.clamp(-1.0, 1.0);
            let confidence = ((best.1 as f64).sqrt() / 10.0).min(1.0) * weight.abs();
            edges.push(LearnedEdge {
                from: *from,
                to: *to,
                weight,
                lag: best_lag,
                confidence,
                method: EdgeMethod::BaselineCorrelation,
            });
        }
    }
    edges
}

fn learn_advanced(
    sorted: &[&CheckinRecord],
    metrics: &[MetricId],
    lags: &[u8],
    alpha: f64,
) -> Vec<LearnedEdge> {
    if sorted.len() < 6 {
        return Vec::new();
    }
    let by_metric: Vec<Vec<f64>> = metrics.iter().map(|m| deltas(sorted, *m)).collect();
    let max_lag = usize::from(lags.iter().copied().max().unwrap_or(1));
    let length = by_metric.first().map_or(0, Vec::len);
    let rows = length.saturating_sub(max_lag);
    if rows < 3 {
        return Vec::new();
    }

    let mut edges = Vec::new();
    for (ti, to) in metrics.iter().enumerate() {
        let labels: Vec<(usize, u8)> = (0..metrics.len())
            .filter(|fi| *fi != ti)
            .flat_map(|fi| lags.iter().map(move |lag| (fi, *lag)))
            .collect();

        let x: Vec<Vec<f64>> = (max_lag..length)
            .map(|row| {
                labels
                    .iter()
                    .map(|(fi, lag)| by_metric[*fi][row - usize::from(*lag)])
                    .collect()
            })
            .collect();
        let y: Vec<f64> = (max_lag..length).map(|row| by_metric[ti][row]).collect();

        let x = Matrix::from_rows(&x);
        let xt = x.transpose();
        let mut xtx = xt.multiply(&x);
        xtx.add_diagonal(alpha);
        let coeff = xtx.invert().multiply(&xt.multiply(&Matrix::column(&y))).first_column();

        for (fi, from) in metrics.iter().enumerate() {
            if fi == ti {
                continue;
            }
            let mut best_lag = lags[0];
            let mut best = 0.0;
            for &lag in lags {
                let value = labels
                    .iter()
                    .position(|l| *l == (fi, lag))
                    .and_then(|idx| coeff.get(idx).copied())
                    .unwrap_or(0.0);
                if beats(value, lag, best, best_lag) {
                    best_lag = lag;
                    best = value;
                }
            }
            let weight = best.clamp(-1.0, 1.0);
            let confidence = ((rows as f64).sqrt() / 10.0).min(1.0) * weight.abs().min(1.0);
            edges.push(LearnedEdge {
                from: *from,
                to: *to,
                weight,
                lag: best_lag,
                confidence,
                method: EdgeMethod::AdvancedRidge,
            });
        }
    }
    edges
}

/// Learn a directed edge list from consecutive checkins.
///
/// Self-edges are never reported. Too few checkins yields an empty list.
pub fn learn_influence_edges(
    checkins: &[CheckinRecord],
    metrics: &[MetricId],
    options: &EdgeLearnOptions,
) -> Result<Vec<LearnedEdge>, ValidationError> {
    options.validate()?;
    if metrics.is_empty() {
        return Err(ValidationError::EmptyMetricList);
    }
    let sorted = sorted_by_time(checkins);
    Ok(match options.method {
        EdgeMethod::BaselineCorrelation => learn_baseline(&sorted, metrics, &options.lags),
        EdgeMethod::AdvancedRidge => learn_advanced(&sorted, metrics, &options.lags, options.ridge_alpha),
    })
}

impl InfluenceMatrix {
    /// Collect learned edges into a matrix.
    #[must_use]
    pub fn from_learned_edges(edges: &[LearnedEdge]) -> Self {
        Self::from_edges(edges.iter().map(|e| (e.from, e.to, e.weight)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone, Utc};

    use crate::metric::MetricVector;

    fn from_deltas(source: &[f64], target: &[f64]) -> Vec<CheckinRecord> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut energy = 5.0;
        let mut focus = 5.0;
        let mut rows = Vec::new();
        for day in 0..=source.len() {
            if day > 0 {
                energy += source[day - 1];
                focus += target[day - 1];
            }
            let values = MetricVector::default()
                .with(MetricId::Energy, energy)
                .with(MetricId::Focus, focus);
            rows.push(CheckinRecord::new(start + Duration::days(day as i64), values));
        }
        rows
    }

    fn find(edges: &[LearnedEdge], from: MetricId, to: MetricId) -> &LearnedEdge {
        edges.iter().find(|e| e.from == from && e.to == to).unwrap()
    }

    #[test]
    fn baseline_is_deterministic_and_skips_self_edges() {
        let source = [1.0, 2.0, -1.0, 1.0, -2.0, 2.0, -1.0, 2.0, -2.0, 1.0, 2.0, -1.0];
        let target = [0.0, 1.0, 2.0, -1.0, 1.0, -2.0, 2.0, -1.0, 2.0, -2.0, 1.0, 2.0];
        let checkins = from_deltas(&source, &target);
        let a = learn_influence_edges(&checkins, &MetricId::ALL, &EdgeLearnOptions::default()).unwrap();
        let b = learn_influence_edges(&checkins, &MetricId::ALL, &EdgeLearnOptions::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 9 * 8);
        assert!(a.iter().all(|e| e.from != e.to));
    }

    #[test]
    fn baseline_selects_lag_with_strongest_correlation() {
        // Energy moves stay within [0, 10] because the walk oscillates around 5.
        let source = [
            1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 2.0, -2.0, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 1.0, -1.0, 2.0, -2.0,
        ];
        let mut target = vec![0.0, 0.0];
        target.extend_from_slice(&source[..source.len() - 2]);
        let checkins = from_deltas(&source, &target);

        let edges = learn_influence_edges(&checkins, &MetricId::ALL, &EdgeLearnOptions::default()).unwrap();
        let edge = find(&edges, MetricId::Energy, MetricId::Focus);
        assert_eq!(edge.lag, 2);
        assert!(edge.weight.abs() > 0.95);
    }

    #[test]
    fn confidence_grows_with_sample_count() {
        let pattern = [1.0, -1.0, 2.0, -2.0, 1.0, -1.0, 2.0, -2.0];
        let short_source: Vec<f64> = pattern.iter().chain(pattern.iter()).copied().collect();
        let mut short_target = vec![0.0];
        short_target.extend_from_slice(&short_source[..short_source.len() - 1]);
        let long_source: Vec<f64> = short_source.iter().chain(short_source.iter()).copied().collect();
        let mut long_target = vec![0.0];
        long_target.extend_from_slice(&long_source[..long_source.len() - 1]);

        let opts = EdgeLearnOptions::default();
        let short = learn_influence_edges(&from_deltas(&short_source, &short_target), &MetricId::ALL, &opts).unwrap();
        let long = learn_influence_edges(&from_deltas(&long_source, &long_target), &MetricId::ALL, &opts).unwrap();

        let s = find(&short, MetricId::Energy, MetricId::Focus).confidence;
        let l = find(&long, MetricId::Energy, MetricId::Focus).confidence;
        assert!(l > s);
    }

    #[test]
    fn advanced_ridge_finds_positive_lagged_driver() {
        let source = [
            1.0, -1.0, 2.0, -2.0, 1.0, 0.0, -1.0, 2.0, -2.0, 1.0, -1.0, 1.0, 0.0, -1.0, 2.0, -2.0, 1.0, -1.0,
        ];
        let mut target = vec![0.0];
        target.extend_from_slice(&source[..source.len() - 1]);
        let opts = EdgeLearnOptions {
            method: EdgeMethod::AdvancedRidge,
            ..EdgeLearnOptions::default()
        };
        let edges = learn_influence_edges(&from_deltas(&source, &target), &MetricId::ALL, &opts).unwrap();
        let edge = find(&edges, MetricId::Energy, MetricId::Focus);
        assert_eq!(edge.method, EdgeMethod::AdvancedRidge);
        assert_eq!(edge.lag, 1);
        assert!(edge.weight > 0.0);
    }

    #[test]
    fn too_few_checkins_yield_no_edges() {
        let checkins = from_deltas(&[1.0], &[1.0]);
        let edges = learn_influence_edges(&checkins, &MetricId::ALL, &EdgeLearnOptions::default()).unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn invalid_lags_are_rejected() {
        let opts = EdgeLearnOptions {
            lags: vec![1, 4],
            ..EdgeLearnOptions::default()
        };
        assert!(learn_influence_edges(&[], &MetricId::ALL, &opts).is_err());
    }

    #[test]
    fn edges_collect_into_matrix() {
        let edge = LearnedEdge {
            from: MetricId::SleepHours,
            to: MetricId::Energy,
            weight: 0.7,
            lag: 1,
            confidence: 0.5,
            method: EdgeMethod::BaselineCorrelation,
        };
        let m = InfluenceMatrix::from_learned_edges(&[edge]);
        assert_eq!(m.get(MetricId::SleepHours, MetricId::Energy), 0.7);
    }
}
