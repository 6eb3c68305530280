//! Dense daily series built from sparse checkins.

use chrono::NaiveDate;

use crate::checkin::{sorted_by_time, CheckinRecord};
use crate::metric::{MetricId, MetricVector};

/// One row per calendar day between the first and last checkin.
///
/// Days without a checkin carry forward the latest known state; when several
/// checkins share a day, the latest one wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseSeries {
    days: Vec<NaiveDate>,
    rows: Vec<MetricVector>,
}

impl DenseSeries {
    /// Forward-fill `checkins` into a daily series.
    #[must_use]
    pub fn from_checkins(checkins: &[CheckinRecord]) -> Self {
        let sorted = sorted_by_time(checkins);
        let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
            return Self::default();
        };

        let mut days = Vec::new();
        let mut rows = Vec::new();
        let mut pointer = 0;
        let mut current = first.values;
        let mut day = first.day();
        let end = last.day();

        while day <= end {
            while pointer < sorted.len() && sorted[pointer].day() <= day {
                current = sorted[pointer].values;
                pointer += 1;
            }
            days.push(day);
            rows.push(current);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        Self { days, rows }
    }

    /// Number of days covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.days.len()
    }

    /// Returns true if the series has no days.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Calendar days covered.
    #[must_use]
    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    /// Raw values of one metric across all days.
    #[must_use]
    pub fn series(&self, metric: MetricId) -> Vec<f64> {
        self.rows.iter().map(|row| row.get(metric)).collect()
    }

    /// The trailing `days` rows (the whole series if it is shorter).
    #[must_use]
    pub fn tail(&self, days: usize) -> Self {
        if days >= self.len() {
            return self.clone();
        }
        let from = self.len() - days;
        Self {
            days: self.days[from..].to_vec(),
            rows: self.rows[from..].to_vec(),
        }
    }
}

/// Z-score a series with the population standard deviation.
///
/// A constant series (std-dev at or below machine epsilon) carries no signal
/// and normalises to all zeros.
#[must_use]
pub fn z_score(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if std <= f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}
