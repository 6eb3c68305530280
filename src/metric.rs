//! Metric catalogue and fully populated metric vectors.
//!
//! Nine fixed metrics describe one instant of personal state. Every value is
//! clamped into its metric's declared range after each mutation, so a
//! `MetricVector` can never hold an out-of-bounds reading.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Number of tracked metrics.
pub const METRIC_COUNT: usize = 9;

/// Identifier of one tracked metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricId {
    /// Physical energy.
    Energy,
    /// Ability to concentrate.
    Focus,
    /// Overall mood.
    Mood,
    /// Perceived stress (higher is worse).
    Stress,
    /// Hours slept.
    SleepHours,
    /// Social connection.
    Social,
    /// Work output.
    Productivity,
    /// Physical health.
    Health,
    /// Net cash flow.
    CashFlow,
}

/// Declared range, granularity and display label of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSpec {
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
    /// Input granularity (informational; values are not snapped).
    pub step: f64,
    /// Human-readable label.
    pub label: &'static str,
}

const fn spec(min: f64, max: f64, step: f64, label: &'static str) -> MetricSpec {
    MetricSpec { min, max, step, label }
}

impl MetricId {
    /// All metrics in catalogue order.
    pub const ALL: [MetricId; METRIC_COUNT] = [
        Self::Energy,
        Self::Focus,
        Self::Mood,
        Self::Stress,
        Self::SleepHours,
        Self::Social,
        Self::Productivity,
        Self::Health,
        Self::CashFlow,
    ];

    /// Position of this metric in [`MetricId::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Declared range and step of this metric.
    #[must_use]
    pub const fn spec(self) -> MetricSpec {
        match self {
            Self::Energy => spec(0.0, 10.0, 1.0, "Energy"),
            Self::Focus => spec(0.0, 10.0, 1.0, "Focus"),
            Self::Mood => spec(0.0, 10.0, 1.0, "Mood"),
            Self::Stress => spec(0.0, 10.0, 1.0, "Stress"),
            Self::SleepHours => spec(0.0, 12.0, 0.5, "Sleep (hours)"),
            Self::Social => spec(0.0, 10.0, 1.0, "Social"),
            Self::Productivity => spec(0.0, 10.0, 1.0, "Productivity"),
            Self::Health => spec(0.0, 10.0, 1.0, "Health"),
            Self::CashFlow => spec(0.0, 1_000_000.0, 100.0, "Cash flow"),
        }
    }

    /// Width of the declared range.
    #[must_use]
    pub fn span(self) -> f64 {
        let s = self.spec();
        s.max - s.min
    }

    /// Clamp a raw value into this metric's range.
    ///
    /// NaN maps to the range minimum; infinities saturate at the nearer bound.
    #[must_use]
    pub fn clamp(self, value: f64) -> f64 {
        let s = self.spec();
        if value.is_nan() {
            return s.min;
        }
        value.clamp(s.min, s.max)
    }

    /// Map a value onto [0, 1] relative to the declared range.
    #[must_use]
    pub fn normalize(self, value: f64) -> f64 {
        (self.clamp(value) - self.spec().min) / self.span()
    }

    /// Snake-case identifier used in serialized forms.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Energy => "energy",
            Self::Focus => "focus",
            Self::Mood => "mood",
            Self::Stress => "stress",
            Self::SleepHours => "sleep_hours",
            Self::Social => "social",
            Self::Productivity => "productivity",
            Self::Health => "health",
            Self::CashFlow => "cash_flow",
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownMetric { label: s.to_string() })
    }
}

/// Complete metric state at one instant.
///
/// Serializes as a `snake_case` map; deserialization rejects missing or
/// non-finite entries and clamps the rest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<MetricId, f64>", into = "BTreeMap<MetricId, f64>")]
pub struct MetricVector {
    values: [f64; METRIC_COUNT],
}

impl Default for MetricVector {
    fn default() -> Self {
        let mut v = Self {
            values: [5.0; METRIC_COUNT],
        };
        v.set(MetricId::SleepHours, 8.0);
        v.set(MetricId::CashFlow, 0.0);
        v
    }
}

impl MetricVector {
    /// Build a vector from raw values in catalogue order, clamping each.
    #[must_use]
    pub fn from_values(values: [f64; METRIC_COUNT]) -> Self {
        let mut v = Self { values };
        for metric in MetricId::ALL {
            v.values[metric.index()] = metric.clamp(values[metric.index()]);
        }
        v
    }

    /// Returns the value of a metric.
    #[must_use]
    pub fn get(&self, metric: MetricId) -> f64 {
        self.values[metric.index()]
    }

    /// Set a metric, clamping into range.
    pub fn set(&mut self, metric: MetricId, value: f64) {
        self.values[metric.index()] = metric.clamp(value);
    }

    /// Add a delta to a metric, clamping into range.
    pub fn nudge(&mut self, metric: MetricId, delta: f64) {
        self.set(metric, self.get(metric) + delta);
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, metric: MetricId, value: f64) -> Self {
        self.set(metric, value);
        self
    }

    /// Iterate `(metric, value)` pairs in catalogue order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricId, f64)> + '_ {
        MetricId::ALL.into_iter().map(|m| (m, self.values[m.index()]))
    }

    /// Returns true if every value lies within its declared range.
    #[must_use]
    pub fn within_bounds(&self) -> bool {
        self.iter().all(|(m, v)| {
            let s = m.spec();
            v.is_finite() && v >= s.min && v <= s.max
        })
    }
}

impl Index<MetricId> for MetricVector {
    type Output = f64;

    fn index(&self, metric: MetricId) -> &f64 {
        &self.values[metric.index()]
    }
}

impl TryFrom<BTreeMap<MetricId, f64>> for MetricVector {
    type Error = ValidationError;

    fn try_from(map: BTreeMap<MetricId, f64>) -> Result<Self, Self::Error> {
        let mut values = [0.0; METRIC_COUNT];
        for metric in MetricId::ALL {
            let value = *map.get(&metric).ok_or(ValidationError::MissingMetric { metric })?;
            crate::error::ensure_finite(metric.as_str(), value)?;
            values[metric.index()] = value;
        }
        Ok(Self::from_values(values))
    }
}

impl From<MetricVector> for BTreeMap<MetricId, f64> {
    fn from(v: MetricVector) -> Self {
        v.iter().collect()
    }
}

/// Sparse additive per-metric deltas (one day's merged impulses).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricDelta(BTreeMap<MetricId, f64>);

impl MetricDelta {
    /// Create an empty delta set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate `delta` onto `metric`.
    pub fn add(&mut self, metric: MetricId, delta: f64) {
        *self.0.entry(metric).or_insert(0.0) += delta;
    }

    /// Merge another delta set additively.
    pub fn merge(&mut self, other: &MetricDelta) {
        for (metric, delta) in other.iter() {
            self.add(metric, delta);
        }
    }

    /// Returns the accumulated delta for a metric (zero when absent).
    #[must_use]
    pub fn get(&self, metric: MetricId) -> f64 {
        self.0.get(&metric).copied().unwrap_or(0.0)
    }

    /// Iterate non-empty entries in catalogue order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricId, f64)> + '_ {
        self.0.iter().map(|(m, d)| (*m, *d))
    }

    /// Returns true if no metric carries a delta.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(MetricId, f64)> for MetricDelta {
    fn from_iter<I: IntoIterator<Item = (MetricId, f64)>>(iter: I) -> Self {
        let mut delta = Self::new();
        for (metric, value) in iter {
            delta.add(metric, value);
        }
        delta
    }
}
