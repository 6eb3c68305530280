//! Macro regimes and their Markov transition dynamics.

use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, ValidationError};
use crate::rng::Mulberry32;

/// Discrete macro mode of the simulated system (0..=4).
pub type RegimeId = u8;

/// Largest supported number of regimes.
pub const MAX_REGIMES: usize = 5;

const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// Row-stochastic transition matrix, `rows[from][to]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionMatrix {
    rows: Vec<Vec<f64>>,
}

impl Default for TransitionMatrix {
    /// Sticky five-regime chain: mostly stays put, drifts to neighbours.
    fn default() -> Self {
        Self {
            rows: vec![
                vec![0.80, 0.08, 0.07, 0.03, 0.02],
                vec![0.10, 0.80, 0.06, 0.03, 0.01],
                vec![0.10, 0.06, 0.70, 0.10, 0.04],
                vec![0.06, 0.04, 0.15, 0.65, 0.10],
                vec![0.05, 0.02, 0.08, 0.20, 0.65],
            ],
        }
    }
}

impl TransitionMatrix {
    /// Wrap raw rows. Call [`TransitionMatrix::validate`] before use.
    #[must_use]
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    /// Matrix that never leaves the current regime.
    #[must_use]
    pub fn identity(regimes: usize) -> Self {
        let rows = (0..regimes)
            .map(|r| (0..regimes).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
            .collect();
        Self { rows }
    }

    /// Number of regimes covered.
    #[must_use]
    pub fn regimes(&self) -> usize {
        self.rows.len()
    }

    /// Transition probabilities out of `from` (empty if out of range).
    #[must_use]
    pub fn row(&self, from: RegimeId) -> &[f64] {
        self.rows.get(usize::from(from)).map_or(&[][..], Vec::as_slice)
    }

    /// Check shape, finiteness, non-negativity and row sums.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let n = self.rows.len();
        if n == 0 || n > MAX_REGIMES || self.rows.iter().any(|r| r.len() != n) {
            return Err(ValidationError::InvalidTransitionShape {
                rows: n,
                cols: self.rows.first().map_or(0, Vec::len),
                max: MAX_REGIMES,
            });
        }
        for (row_idx, row) in self.rows.iter().enumerate() {
            for p in row {
                ensure_finite("transition_matrix", *p)?;
                if *p < 0.0 {
                    return Err(ValidationError::OutOfRange {
                        field: format!("transition_matrix[{row_idx}]"),
                        value: *p,
                        min: 0.0,
                        max: 1.0,
                    });
                }
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(ValidationError::TransitionRowNotStochastic { row: row_idx, sum });
            }
        }
        Ok(())
    }
}

/// Draw the next regime from `from`'s row.
///
/// One uniform draw selects the first bucket whose cumulative probability
/// covers it. A draw beyond the row total (floating error, or an empty row)
/// keeps the current regime.
pub fn sample_transition(rng: &mut Mulberry32, from: RegimeId, matrix: &TransitionMatrix) -> RegimeId {
    let r = rng.next_unit();
    let mut cumulative = 0.0;
    for (to, p) in matrix.row(from).iter().enumerate() {
        cumulative += p;
        if r <= cumulative {
            return u8::try_from(to).unwrap_or(from);
        }
    }
    from
}

/// Additive collapse-probability adjustment for a regime.
#[must_use]
pub const fn collapse_offset(regime: RegimeId) -> f64 {
    match regime {
        4 => 0.06,
        3 => 0.03,
        1 => -0.02,
        _ => 0.0,
    }
}
