//! Self-attention reduction kernel
//!
//! A small, allocation-light matrix type plus the self-attention pass that
//! collapses the mixer's 8 histogram rows into a single fingerprint row.
//! The kernel is pure and fully deterministic: given the same input matrix
//! it always produces the same output, which the store builder relies on
//! for idempotent builds.

/// Softmax stabilizer. The maximum is scaled by a value just under 1 so the
/// subtracted offset stays strictly below the true maximum.
pub const STABILIZER: f64 = 1.0 - 1e-300;

/// A dense row-major f64 matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    cols: usize,
    rows: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create an empty matrix with capacity reserved for `cols * rows` values.
    ///
    /// Rows are appended with [`Matrix::push_row`] until the matrix is full.
    pub fn with_shape(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            data: Vec::with_capacity(cols * rows),
        }
    }

    /// Append one row of `cols` values.
    pub fn push_row(&mut self, row: &[f64]) {
        debug_assert_eq!(row.len(), self.cols);
        debug_assert!(self.data.len() + self.cols <= self.cols * self.rows);
        self.data.extend_from_slice(row);
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Borrow row `i` as a slice.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Sum the rows into a single vector of `cols` values.
    pub fn sum_rows(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.cols];
        for i in 0..self.rows {
            let row = self.row(i);
            for (o, v) in out.iter_mut().zip(row) {
                *o += v;
            }
        }
        out
    }
}

#[inline]
fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// Numerically stabilized in-place softmax.
///
/// The running maximum starts at zero, so all-negative inputs stabilize
/// against zero rather than their own maximum. Inputs here are dot products
/// of non-negative probability rows, which are never negative.
pub fn softmax(values: &mut [f64]) {
    let mut max = 0.0;
    for &v in values.iter() {
        if v > max {
            max = v;
        }
    }
    let s = max * STABILIZER;
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - s).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// Self-attention of Q, K, V.
///
/// For each key row, takes dot products against every query row, softmaxes
/// the scores, and emits the score-weighted sum of the value rows. Output
/// shape is (K.rows, V.cols).
pub fn self_attention(q: &Matrix, k: &Matrix, v: &Matrix) -> Matrix {
    debug_assert_eq!(q.cols, k.cols);
    debug_assert_eq!(q.rows, v.rows);
    let mut out = Matrix::with_shape(v.cols, k.rows);
    let mut scores = vec![0.0; q.rows];
    let mut row = vec![0.0; v.cols];
    for i in 0..k.rows {
        let key = k.row(i);
        for (j, score) in scores.iter_mut().enumerate() {
            *score = dot(key, q.row(j));
        }
        softmax(&mut scores);
        row.fill(0.0);
        for (j, &weight) in scores.iter().enumerate() {
            for (o, v) in row.iter_mut().zip(v.row(j)) {
                *o += weight * v;
            }
        }
        out.push_row(&row);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let mut values = vec![0.1, 2.0, 0.5, 1.5];
        softmax(&mut values);
        let sum: f64 = values.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(values.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn softmax_uniform_on_equal_scores() {
        let mut values = vec![3.0; 8];
        softmax(&mut values);
        for v in values {
            assert!((v - 0.125).abs() < 1e-12);
        }
    }

    #[test]
    fn softmax_handles_large_scores() {
        let mut values = vec![700.0, 710.0];
        softmax(&mut values);
        assert!(values.iter().all(|v| v.is_finite()));
        let sum: f64 = values.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sum_rows_adds_per_column() {
        let mut m = Matrix::with_shape(3, 2);
        m.push_row(&[1.0, 2.0, 3.0]);
        m.push_row(&[4.0, 5.0, 6.0]);
        assert_eq!(m.sum_rows(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn attention_is_convex_combination() {
        // With Q=K=V, every output row is a softmax-weighted mix of the
        // input rows, so each column stays within the column's input range.
        let mut m = Matrix::with_shape(2, 3);
        m.push_row(&[1.0, 0.0]);
        m.push_row(&[0.0, 1.0]);
        m.push_row(&[0.5, 0.5]);
        let out = self_attention(&m, &m, &m);
        assert_eq!(out.rows(), 3);
        assert_eq!(out.cols(), 2);
        for i in 0..out.rows() {
            for &v in out.row(i) {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn attention_is_deterministic() {
        let mut m = Matrix::with_shape(4, 2);
        m.push_row(&[0.1, 0.2, 0.3, 0.4]);
        m.push_row(&[0.4, 0.3, 0.2, 0.1]);
        let a = self_attention(&m, &m, &m);
        let b = self_attention(&m, &m, &m);
        assert_eq!(a, b);
    }
}
