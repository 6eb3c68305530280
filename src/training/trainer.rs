//! Learned influence matrix trainer.
//!
//! Turns a checkin history into the weight matrix the simulator consumes, plus
//! a stability matrix comparing 30- and 60-day refits. Output depends only on
//! the inputs: `computed_at` is stamped from the options, never read from the
//! clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checkin::CheckinRecord;
use crate::error::ValidationError;
use crate::influence::{round4, InfluenceMatrix, StabilityMatrix};
use crate::metric::MetricId;

use super::dense::DenseSeries;
use super::ridge::{train_ridge_matrix, FALLBACK_ALPHA, MIN_ROWS};

/// Days in the short stability window.
pub const SHORT_WINDOW_DAYS: usize = 30;
/// Days in the long stability window.
pub const LONG_WINDOW_DAYS: usize = 60;
/// Weights within this distance of zero count as noise for stability.
pub const STABLE_ZERO_BAND: f64 = 0.05;

const FORWARD_FILL_NOTE: &str = "Days without a checkin are forward-filled from the latest known value.";

/// How much trailing history to train on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingWindow {
    /// Every densified day.
    #[default]
    All,
    /// The trailing `n` days.
    Days(usize),
}

/// Options for one training invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerOptions {
    /// Trailing window of the densified series.
    pub window: TrainingWindow,
    /// Lag order, 1..=3.
    pub lags: u8,
    /// Timestamp stamped onto the result metadata.
    pub computed_at: DateTime<Utc>,
}

impl TrainerOptions {
    /// Options with the full window and lag order 2.
    #[must_use]
    pub fn new(computed_at: DateTime<Utc>) -> Self {
        Self {
            window: TrainingWindow::All,
            lags: 2,
            computed_at,
        }
    }

    /// Set the training window.
    #[must_use]
    pub fn window(mut self, window: TrainingWindow) -> Self {
        self.window = window;
        self
    }

    /// Set the lag order.
    #[must_use]
    pub fn lags(mut self, lags: u8) -> Self {
        self.lags = lags;
        self
    }

    /// Validate options.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=3).contains(&self.lags) {
            return Err(ValidationError::InvalidLagOrder { lags: self.lags });
        }
        if self.window == TrainingWindow::Days(0) {
            return Err(ValidationError::EmptyTrainingWindow);
        }
        Ok(())
    }
}

/// Provenance of a learned matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedMatrixMeta {
    /// Days in the selected training window.
    pub trained_on_days: usize,
    /// Lag order used.
    pub lags: u8,
    /// Mean chosen ridge strength.
    pub alpha: f64,
    /// Caller-supplied computation timestamp.
    pub computed_at: DateTime<Utc>,
    /// Explanatory note (data handling, or why fitting was skipped).
    pub note: String,
    /// True when the insufficient-data guard skipped fitting.
    pub insufficient_data: bool,
}

/// Trainer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedMatrix {
    /// Normalized weights in [-1, 1].
    pub weights: InfluenceMatrix,
    /// Per-edge agreement between short and long windows.
    pub stability: StabilityMatrix,
    /// Provenance and guard outcome.
    pub meta: LearnedMatrixMeta,
}

/// Minimum densified days required before any regression is attempted.
#[must_use]
pub const fn minimum_days(lags: u8) -> usize {
    lags as usize + MIN_ROWS + 1
}

/// Train a learned influence matrix from a checkin history.
///
/// When the selected window holds no more than `lags + 12` days, fitting is
/// skipped entirely and an all-zero matrix is returned with a note stating the
/// minimum requirement.
pub fn train_learned_matrix(
    checkins: &[CheckinRecord],
    metrics: &[MetricId],
    options: &TrainerOptions,
) -> Result<LearnedMatrix, ValidationError> {
    options.validate()?;
    let metrics = dedup_metrics(metrics)?;
    let lags = usize::from(options.lags);

    let dense = DenseSeries::from_checkins(checkins);
    let window_days = match options.window {
        TrainingWindow::All => dense.len(),
        TrainingWindow::Days(days) => days.min(dense.len()),
    };
    let selected = dense.tail(window_days);

    if selected.len() < minimum_days(options.lags) {
        info!(
            days = selected.len(),
            required = minimum_days(options.lags),
            "insufficient history, returning zero influence matrix"
        );
        return Ok(LearnedMatrix {
            weights: InfluenceMatrix::zeros(),
            stability: StabilityMatrix::zeros(),
            meta: LearnedMatrixMeta {
                trained_on_days: selected.len(),
                lags: options.lags,
                alpha: FALLBACK_ALPHA,
                computed_at: options.computed_at,
                note: format!(
                    "Not enough history to learn influences: need at least {} days for lag order {}, got {}. {}",
                    minimum_days(options.lags),
                    options.lags,
                    selected.len(),
                    FORWARD_FILL_NOTE
                ),
                insufficient_data: true,
            },
        });
    }

    let fit = train_ridge_matrix(&selected, &metrics, lags);
    let stability = compute_stability(&selected, &metrics, lags);
    debug!(days = selected.len(), lags, alpha = fit.alpha, "learned influence matrix trained");

    Ok(LearnedMatrix {
        weights: fit.weights,
        stability,
        meta: LearnedMatrixMeta {
            trained_on_days: selected.len(),
            lags: options.lags,
            alpha: fit.alpha,
            computed_at: options.computed_at,
            note: FORWARD_FILL_NOTE.to_string(),
            insufficient_data: false,
        },
    })
}

fn dedup_metrics(metrics: &[MetricId]) -> Result<Vec<MetricId>, ValidationError> {
    if metrics.is_empty() {
        return Err(ValidationError::EmptyMetricList);
    }
    let mut out: Vec<MetricId> = Vec::with_capacity(metrics.len());
    for m in metrics {
        if !out.contains(m) {
            out.push(*m);
        }
    }
    Ok(out)
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Agreement between a short-window weight `a` and a long-window weight `b`.
///
/// Both near zero counts as fully stable. Otherwise sign agreement contributes
/// 0.6 and magnitude agreement `1 - ||a| - |b||` contributes 0.4.
#[must_use]
pub fn stability_score(a: f64, b: f64) -> f64 {
    if a.abs() < STABLE_ZERO_BAND && b.abs() < STABLE_ZERO_BAND {
        return 1.0;
    }
    let sign_agree = if sign(a) == sign(b) { 1.0 } else { 0.0 };
    let magnitude_agree = 1.0 - (a.abs() - b.abs()).abs().clamp(0.0, 1.0);
    round4((sign_agree * 0.6 + magnitude_agree * 0.4).clamp(0.0, 1.0))
}

/// Score every edge among `metrics` by refitting on the trailing 30 and 60
/// days. Edges touching an untrained metric stay at 0.
#[must_use]
pub fn compute_stability(series: &DenseSeries, metrics: &[MetricId], lags: usize) -> StabilityMatrix {
    let short = train_ridge_matrix(&series.tail(SHORT_WINDOW_DAYS), metrics, lags).weights;
    let long = train_ridge_matrix(&series.tail(LONG_WINDOW_DAYS), metrics, lags).weights;

    let mut stability = StabilityMatrix::zeros();
    for &from in metrics {
        for &to in metrics {
            stability.set(from, to, stability_score(short.get(from, to), long.get(from, to)));
        }
    }
    stability
}

/// Cache key for a learned matrix: `<metric-set-hash>:<days>:<lags>`.
#[must_use]
pub fn learned_matrix_key(metrics: &[MetricId], trained_on_days: usize, lags: u8) -> String {
    let joined = metrics.iter().map(|m| m.as_str()).collect::<Vec<_>>().join("|");
    let hash = blake3::hash(joined.as_bytes());
    format!("{}:{trained_on_days}:{lags}", &hash.to_hex()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};

    use crate::metric::MetricVector;

    fn flat_history(days: i64) -> Vec<CheckinRecord> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        (0..days)
            .map(|i| CheckinRecord::new(start + Duration::days(i), MetricVector::default()))
            .collect()
    }

    fn opts() -> TrainerOptions {
        TrainerOptions::new(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn options_reject_bad_lags_and_window() {
        assert!(opts().lags(0).validate().is_err());
        assert!(opts().lags(4).validate().is_err());
        assert!(opts().window(TrainingWindow::Days(0)).validate().is_err());
        assert!(opts().lags(3).window(TrainingWindow::Days(30)).validate().is_ok());
    }

    #[test]
    fn empty_metric_list_is_rejected() {
        let err = train_learned_matrix(&flat_history(40), &[], &opts()).unwrap_err();
        assert_eq!(err, ValidationError::EmptyMetricList);
    }

    #[test]
    fn guard_threshold_is_lags_plus_twelve() {
        assert_eq!(minimum_days(1), 14);
        let at_limit = train_learned_matrix(&flat_history(13), &MetricId::ALL, &opts().lags(1)).unwrap();
        assert!(at_limit.meta.insufficient_data);
        assert!(at_limit.weights.is_zero());
        assert!(!at_limit.meta.note.is_empty());

        let above = train_learned_matrix(&flat_history(14), &MetricId::ALL, &opts().lags(1)).unwrap();
        assert!(!above.meta.insufficient_data);
    }

    #[test]
    fn constant_history_learns_nothing() {
        let learned = train_learned_matrix(&flat_history(40), &MetricId::ALL, &opts()).unwrap();
        assert!(learned.weights.is_zero());
        // Both windows fit zero everywhere: stable-at-zero.
        assert_eq!(learned.stability.mean(), 1.0);
    }

    #[test]
    fn stability_covers_only_trained_metrics() {
        let metrics = [MetricId::Energy, MetricId::Focus];
        let learned = train_learned_matrix(&flat_history(40), &metrics, &opts()).unwrap();
        assert_eq!(learned.stability.get(MetricId::Energy, MetricId::Focus), 1.0);
        assert_eq!(learned.stability.get(MetricId::Focus, MetricId::Focus), 1.0);
        assert_eq!(learned.stability.get(MetricId::Mood, MetricId::Health), 0.0);
        assert_eq!(learned.stability.get(MetricId::Energy, MetricId::Mood), 0.0);
    }

    #[test]
    fn stability_score_cases() {
        assert_eq!(stability_score(0.01, -0.02), 1.0);
        assert_eq!(stability_score(0.5, 0.5), 1.0);
        assert!((stability_score(0.5, -0.5) - 0.4).abs() < 1e-12);
        assert!((stability_score(0.8, 0.2) - (0.6 + 0.4 * 0.4)).abs() < 1e-9);
        assert!(stability_score(-1.0, 1.0) < 0.45);
    }

    #[test]
    fn cache_key_is_stable() {
        let a = learned_matrix_key(&MetricId::ALL, 60, 2);
        let b = learned_matrix_key(&MetricId::ALL, 60, 2);
        assert_eq!(a, b);
        assert!(a.ends_with(":60:2"));
        assert_ne!(a, learned_matrix_key(&MetricId::ALL[..3], 60, 2));
    }
}
