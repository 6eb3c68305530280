//! Per-target ridge regression over lagged, normalised features.

use tracing::debug;

use crate::influence::{round4, InfluenceMatrix};
use crate::linalg::Matrix;
use crate::metric::MetricId;

use super::dense::{z_score, DenseSeries};

/// Candidate ridge strengths, in ascending order.
pub const ALPHA_GRID: [f64; 3] = [0.1, 1.0, 10.0];

/// Alpha reported when no target could be fitted.
pub const FALLBACK_ALPHA: f64 = 1.0;

/// Minimum lagged rows needed to fit one target.
pub const MIN_ROWS: usize = 12;

/// Features and labels for one target metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaggedDataset {
    /// One row per eligible day: for each source metric, lags `1..=L` in order.
    pub features: Vec<Vec<f64>>,
    /// Target's normalised value on that day.
    pub labels: Vec<f64>,
}

impl LaggedDataset {
    /// Build the dataset for `target` from per-metric normalised series.
    ///
    /// `normalized[i]` is the series of `metrics[i]`.
    #[must_use]
    pub fn build(normalized: &[Vec<f64>], target: usize, lags: usize) -> Self {
        let length = normalized.get(target).map_or(0, Vec::len);
        let mut features = Vec::with_capacity(length.saturating_sub(lags));
        let mut labels = Vec::with_capacity(length.saturating_sub(lags));

        for day in lags..length {
            let mut row = Vec::with_capacity(normalized.len() * lags);
            for series in normalized {
                for lag in 1..=lags {
                    row.push(series[day - lag]);
                }
            }
            features.push(row);
            labels.push(normalized[target][day]);
        }

        Self { features, labels }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Solve `(XᵗX + alpha·I)⁻¹ Xᵗy`.
#[must_use]
pub fn fit_ridge(features: &[Vec<f64>], labels: &[f64], alpha: f64) -> Vec<f64> {
    let x = Matrix::from_rows(features);
    let xt = x.transpose();
    let mut xtx = xt.multiply(&x);
    xtx.add_diagonal(alpha);
    let xty = xt.multiply(&Matrix::column(labels));
    xtx.invert().multiply(&xty).first_column()
}

fn predict(row: &[f64], beta: &[f64]) -> f64 {
    row.iter().zip(beta).map(|(x, b)| x * b).sum()
}

/// Pick the alpha with the lowest average walk-forward validation MSE.
///
/// Training prefixes start at half the rows (at least 6) and grow by one
/// validation chunk (a fifth of the rows, at least 2) per fold. Ties go to the
/// smallest alpha.
#[must_use]
pub fn choose_alpha(features: &[Vec<f64>], labels: &[f64]) -> f64 {
    let rows = features.len();
    let min_train = (rows / 2).max(6);
    let val_size = (rows / 5).max(2);

    let mut best_alpha = ALPHA_GRID[0];
    let mut best_mse = f64::INFINITY;

    for alpha in ALPHA_GRID {
        let mut mses = Vec::new();
        let mut train_end = min_train;
        while train_end + val_size <= rows {
            let beta = fit_ridge(&features[..train_end], &labels[..train_end], alpha);
            let val_x = &features[train_end..train_end + val_size];
            let val_y = &labels[train_end..train_end + val_size];
            let sse: f64 = val_x
                .iter()
                .zip(val_y)
                .map(|(row, y)| (predict(row, &beta) - y).powi(2))
                .sum();
            mses.push(sse / val_size as f64);
            train_end += val_size;
        }

        let avg = if mses.is_empty() {
            f64::INFINITY
        } else {
            mses.iter().sum::<f64>() / mses.len() as f64
        };
        if avg < best_mse || (avg == best_mse && alpha < best_alpha) {
            best_mse = avg;
            best_alpha = alpha;
        }
    }

    best_alpha
}

/// Output of one full ridge fit across all targets.
#[derive(Debug, Clone, PartialEq)]
pub struct RidgeFit {
    /// Normalised weights in [-1, 1], rounded to 4 decimals.
    pub weights: InfluenceMatrix,
    /// Mean of the per-target chosen alphas (2 decimals).
    pub alpha: f64,
}

/// Fit every target in `metrics` and assemble a normalised influence matrix.
///
/// Coefficients of all lags of one source metric are summed into a single
/// `from -> to` weight. The whole matrix is then divided by its largest
/// absolute entry so targets are comparable.
#[must_use]
pub fn train_ridge_matrix(series: &DenseSeries, metrics: &[MetricId], lags: usize) -> RidgeFit {
    let normalized: Vec<Vec<f64>> = metrics.iter().map(|m| z_score(&series.series(*m))).collect();
    let mut raw = InfluenceMatrixRaw::default();
    let mut alphas = Vec::new();

    for (target_pos, target) in metrics.iter().enumerate() {
        let dataset = LaggedDataset::build(&normalized, target_pos, lags);
        if dataset.len() < MIN_ROWS {
            continue;
        }

        let alpha = choose_alpha(&dataset.features, &dataset.labels);
        alphas.push(alpha);
        let beta = fit_ridge(&dataset.features, &dataset.labels, alpha);
        debug!(target = %target, alpha, rows = dataset.len(), "ridge target fitted");

        for (source_pos, source) in metrics.iter().enumerate() {
            let sum: f64 = (0..lags)
                .map(|lag| beta.get(source_pos * lags + lag).copied().unwrap_or(0.0))
                .sum();
            raw.set(*source, *target, sum);
        }
    }

    let max_abs = raw.max_abs();
    let scale = if max_abs > f64::EPSILON { max_abs } else { 1.0 };
    let mut weights = InfluenceMatrix::zeros();
    for from in MetricId::ALL {
        for to in MetricId::ALL {
            let scaled = (raw.get(from, to) / scale).clamp(-1.0, 1.0);
            weights.set(from, to, round4(scaled));
        }
    }

    let alpha = if alphas.is_empty() {
        FALLBACK_ALPHA
    } else {
        (alphas.iter().sum::<f64>() / alphas.len() as f64 * 100.0).round() / 100.0
    };

    RidgeFit { weights, alpha }
}

/// Unbounded coefficient sums before normalisation.
#[derive(Default)]
struct InfluenceMatrixRaw {
    cells: [[f64; crate::metric::METRIC_COUNT]; crate::metric::METRIC_COUNT],
}

impl InfluenceMatrixRaw {
    fn set(&mut self, from: MetricId, to: MetricId, value: f64) {
        self.cells[from.index()][to.index()] = value;
    }

    fn get(&self, from: MetricId, to: MetricId) -> f64 {
        self.cells[from.index()][to.index()]
    }

    fn max_abs(&self) -> f64 {
        self.cells.iter().flatten().fold(0.0, |acc, v| acc.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagged_rows_are_grouped_by_metric_then_lag() {
        let normalized = vec![vec![1.0, 2.0, 3.0, 4.0], vec![10.0, 20.0, 30.0, 40.0]];
        let ds = LaggedDataset::build(&normalized, 1, 2);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.features[0], vec![2.0, 1.0, 20.0, 10.0]);
        assert_eq!(ds.labels, vec![30.0, 40.0]);
    }

    #[test]
    fn ridge_recovers_simple_slope() {
        let features: Vec<Vec<f64>> = (0..50).map(|i| vec![f64::from(i) / 10.0]).collect();
        let labels: Vec<f64> = features.iter().map(|r| 2.0 * r[0]).collect();
        let beta = fit_ridge(&features, &labels, 0.1);
        assert!((beta[0] - 2.0).abs() < 0.01);
    }

    #[test]
    fn heavier_alpha_shrinks_coefficients() {
        let features: Vec<Vec<f64>> = (0..20).map(|i| vec![f64::from(i % 5) - 2.0]).collect();
        let labels: Vec<f64> = features.iter().map(|r| r[0]).collect();
        let light = fit_ridge(&features, &labels, 0.1)[0];
        let heavy = fit_ridge(&features, &labels, 10.0)[0];
        assert!(heavy.abs() < light.abs());
    }

    #[test]
    fn choose_alpha_breaks_ties_toward_smallest() {
        // All-zero labels and features: every alpha predicts zero perfectly.
        let features = vec![vec![0.0, 0.0]; 30];
        let labels = vec![0.0; 30];
        assert_eq!(choose_alpha(&features, &labels), ALPHA_GRID[0]);
    }

    #[test]
    fn choose_alpha_without_folds_falls_back_to_first() {
        let features = vec![vec![1.0]; 4];
        let labels = vec![1.0; 4];
        assert_eq!(choose_alpha(&features, &labels), ALPHA_GRID[0]);
    }
}
