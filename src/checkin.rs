//! Daily checkin records consumed by the trainers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::metric::MetricVector;

/// One recorded observation of the full metric state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckinRecord {
    /// When the checkin was recorded.
    pub ts: DateTime<Utc>,
    /// Observed values.
    pub values: MetricVector,
}

impl CheckinRecord {
    /// Create a checkin.
    #[must_use]
    pub const fn new(ts: DateTime<Utc>, values: MetricVector) -> Self {
        Self { ts, values }
    }

    /// Calendar day (UTC) the checkin belongs to.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.ts.date_naive()
    }
}

/// Copy of `checkins` ordered by timestamp (stable for equal timestamps).
pub(crate) fn sorted_by_time(checkins: &[CheckinRecord]) -> Vec<&CheckinRecord> {
    let mut sorted: Vec<&CheckinRecord> = checkins.iter().collect();
    sorted.sort_by_key(|c| c.ts);
    sorted
}
