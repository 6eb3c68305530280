//! Error types for Lifeverse.
//!
//! All errors are strongly typed using thiserror. Only malformed input and
//! worker plumbing failures surface as errors: insufficient training data,
//! singular normal equations and cancellation all produce valid values.

use thiserror::Error;

use crate::metric::MetricId;

/// Validation errors that occur before any simulation or training work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Batch requested zero runs.
    #[error("Simulation must request at least one run")]
    ZeroRuns,

    /// Batch requested a zero-day horizon.
    #[error("Simulation horizon must be at least one day")]
    ZeroHorizon,

    /// No metrics were selected.
    #[error("Metric list cannot be empty")]
    EmptyMetricList,

    /// Lag order outside 1..=3.
    #[error("Lag order {lags} is out of range [1, 3]")]
    InvalidLagOrder {
        /// Offending lag order.
        lags: u8,
    },

    /// Training window selects no days.
    #[error("Training window must cover at least one day")]
    EmptyTrainingWindow,

    /// A numeric field is NaN or infinite.
    #[error("Field '{field}' must be finite, got {value}")]
    NonFinite {
        /// Field path.
        field: String,
        /// Rejected value.
        value: f64,
    },

    /// A numeric field is outside its allowed range.
    #[error("Field '{field}' value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field path.
        field: String,
        /// Rejected value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },

    /// Transition matrix is empty, ragged or too large.
    #[error("Transition matrix must be square with 1..={max} regimes, got {rows}x{cols}")]
    InvalidTransitionShape {
        /// Row count.
        rows: usize,
        /// Column count of the first row.
        cols: usize,
        /// Largest supported regime count.
        max: usize,
    },

    /// Transition row does not sum to one.
    #[error("Transition matrix row {row} sums to {sum}, expected 1")]
    TransitionRowNotStochastic {
        /// Row index.
        row: usize,
        /// Actual row sum.
        sum: f64,
    },

    /// Starting regime has no transition row.
    #[error("Regime {regime} is not covered by a {regimes}-regime transition matrix")]
    RegimeOutOfRange {
        /// Requested regime.
        regime: u8,
        /// Regimes the matrix covers.
        regimes: usize,
    },

    /// A metric map omits a tracked metric.
    #[error("Metric map is missing '{metric}'")]
    MissingMetric {
        /// Absent metric.
        metric: MetricId,
    },

    /// A metric label did not parse.
    #[error("Unknown metric '{label}'")]
    UnknownMetric {
        /// Unparsed label.
        label: String,
    },

    /// Laned run requested zero lanes.
    #[error("Lane count must be at least one")]
    ZeroLanes,
}

/// Execution errors raised by the background worker runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The bounded job queue rejected a submission. Retryable.
    #[error("Worker queue is full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// The worker dropped its reply channel.
    #[error("Worker disconnected before replying")]
    Disconnected,

    /// A join did not complete in time.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        /// Wait that elapsed.
        duration_ms: u64,
    },
}

/// Top-level error type for Lifeverse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifeverseError {
    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Worker runtime failure.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Invariant violation inside the crate.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl LifeverseError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if resubmitting the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false, // Validation errors won't change on retry
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for Lifeverse operations.
pub type LifeverseResult<T> = Result<T, LifeverseError>;

pub(crate) fn ensure_finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite {
            field: field.to_string(),
            value,
        })
    }
}

pub(crate) fn ensure_in_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    ensure_finite(field, value)?;
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}
