//! Dense linear algebra kernel for the ridge solver.
//!
//! Row-major `f64` matrices with transpose, multiply and Gauss-Jordan
//! inversion. Inversion of a numerically singular matrix returns the identity
//! instead of failing: callers read that as "no information available".

use std::ops::{Index, IndexMut};

use tracing::debug;

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// A `rows x cols` matrix of zeros.
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// The `size x size` identity.
    #[must_use]
    pub fn identity(size: usize) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m[(i, i)] = 1.0;
        }
        m
    }

    /// Build from row vectors. Short rows are zero-padded to the widest row.
    #[must_use]
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut m = Self::zeros(rows.len(), cols);
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                m[(r, c)] = *value;
            }
        }
        m
    }

    /// Single-column matrix.
    #[must_use]
    pub fn column(values: &[f64]) -> Self {
        Self {
            rows: values.len(),
            cols: 1,
            data: values.to_vec(),
        }
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// One row as a slice.
    #[must_use]
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Copy of the first column.
    #[must_use]
    pub fn first_column(&self) -> Vec<f64> {
        if self.cols == 0 {
            return Vec::new();
        }
        (0..self.rows).map(|r| self[(r, 0)]).collect()
    }

    /// Transpose.
    #[must_use]
    pub fn transpose(&self) -> Self {
        let mut out = Self::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out[(c, r)] = self[(r, c)];
            }
        }
        out
    }

    /// Matrix product `self * rhs`.
    ///
    /// Inner dimensions must agree; a mismatch treats the missing entries as zero.
    #[must_use]
    pub fn multiply(&self, rhs: &Self) -> Self {
        let inner = self.cols.min(rhs.rows);
        let mut out = Self::zeros(self.rows, rhs.cols);
        for r in 0..self.rows {
            for k in 0..inner {
                let a = self[(r, k)];
                if a == 0.0 {
                    continue;
                }
                for c in 0..rhs.cols {
                    out[(r, c)] += a * rhs[(k, c)];
                }
            }
        }
        out
    }

    /// Add `value` to every diagonal entry.
    pub fn add_diagonal(&mut self, value: f64) {
        for i in 0..self.rows.min(self.cols) {
            self[(i, i)] += value;
        }
    }

    /// Gauss-Jordan inverse with partial pivoting.
    ///
    /// At each pivot column the row with the largest absolute entry is swapped
    /// into place. If that entry is at or below machine epsilon the matrix is
    /// treated as singular and the identity is returned.
    #[must_use]
    pub fn invert(&self) -> Self {
        let n = self.rows;
        if n != self.cols {
            return Self::identity(n);
        }
        let width = 2 * n;
        let mut aug = Self::zeros(n, width);
        for r in 0..n {
            for c in 0..n {
                aug[(r, c)] = self[(r, c)];
            }
            aug[(r, n + r)] = 1.0;
        }

        for pivot in 0..n {
            let mut max_row = pivot;
            for r in pivot + 1..n {
                if aug[(r, pivot)].abs() > aug[(max_row, pivot)].abs() {
                    max_row = r;
                }
            }

            if aug[(max_row, pivot)].abs() <= f64::EPSILON {
                debug!(size = n, pivot, "singular matrix, substituting identity");
                return Self::identity(n);
            }

            aug.swap_rows(pivot, max_row);

            let pivot_value = aug[(pivot, pivot)];
            for c in 0..width {
                aug[(pivot, c)] /= pivot_value;
            }

            for r in 0..n {
                if r == pivot {
                    continue;
                }
                let factor = aug[(r, pivot)];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..width {
                    aug[(r, c)] -= factor * aug[(pivot, c)];
                }
            }
        }

        let mut out = Self::zeros(n, n);
        for r in 0..n {
            for c in 0..n {
                out[(r, c)] = aug[(r, n + c)];
            }
        }
        out
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for c in 0..self.cols {
            self.data.swap(a * self.cols + c, b * self.cols + c);
        }
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.cols + c]
    }
}
