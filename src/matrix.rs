// matrix.rs — Host-side dense f32 matrix.
//
// LAYOUT
// ──────
// Column-major, for every matrix in the crate. Element (r, c) of an R×C
// matrix lives at flat index `c * R + r`. The device kernel indexes with the
// same convention:
//
//   A (M×K): A[k * M + idx]   = A(idx, k)
//   B (K×N): B[idy * K + k]   = B(k, idy)
//   C (M×N): C[idy * M + idx] = C(idx, idy)
//
// The dimensions travel next to the buffer, never inside it, so the flat
// `Vec<f32>` can be handed to the device as-is.

use std::fmt;

use crate::error::GemmError;

/// A dense, column-major, single-precision matrix.
#[derive(Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// All-zero `rows × cols` matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Matrix { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// Wrap an existing column-major buffer.
    ///
    /// # Errors
    /// `InvalidDimensions` if a dimension is zero or `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, GemmError> {
        if rows == 0 || cols == 0 {
            return Err(GemmError::InvalidDimensions(format!(
                "matrix dimensions must be positive (got {rows}×{cols})"
            )));
        }
        if data.len() != rows * cols {
            return Err(GemmError::InvalidDimensions(format!(
                "{rows}×{cols} matrix needs {} elements, got {}",
                rows * cols,
                data.len()
            )));
        }
        Ok(Matrix { rows, cols, data })
    }

    /// Build a matrix from `f(row, col)`.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for c in 0..cols {
            for r in 0..rows {
                data.push(f(r, c));
            }
        }
        Matrix { rows, cols, data }
    }

    /// Build a matrix from `f(flat_index)` over the column-major storage.
    pub fn from_flat_fn(rows: usize, cols: usize, f: impl FnMut(usize) -> f32) -> Self {
        Matrix { rows, cols, data: (0..rows * cols).map(f).collect() }
    }

    /// Identity-like matrix: ones on the main diagonal.
    pub fn identity(rows: usize, cols: usize) -> Self {
        Self::from_fn(rows, cols, |r, c| if r == c { 1.0 } else { 0.0 })
    }

    /// Input pattern for A used by the benchmark program: `3.6·i + i² + 3.1`.
    pub fn pattern_a(rows: usize, cols: usize) -> Self {
        Self::from_flat_fn(rows, cols, |i| {
            let i = i as f64;
            (3.6 * i + i * i + 3.1) as f32
        })
    }

    /// Input pattern for B used by the benchmark program: `1.2·i + 0.01·i² + 13.9`.
    pub fn pattern_b(rows: usize, cols: usize) -> Self {
        Self::from_flat_fn(rows, cols, |i| {
            let i = i as f64;
            (1.2 * i + 0.01 * i * i + 13.9) as f32
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of elements (`rows * cols`).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the storage in bytes, i.e. the size of its device mirror.
    #[inline]
    pub fn byte_len(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<f32>()) as u64
    }

    /// Element (r, c).
    ///
    /// # Panics
    /// Panics if `r >= rows` or `c >= cols`.
    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        assert!(r < self.rows && c < self.cols, "({r}, {c}) out of bounds for {self:?}");
        self.data[c * self.rows + r]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        assert!(r < self.rows && c < self.cols, "({r}, {c}) out of bounds for {self:?}");
        self.data[c * self.rows + r] = v;
    }

    /// Column-major storage.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix({}×{}, column-major)", self.rows, self.cols)
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_major_indexing() {
        // 2×3: columns are contiguous.
        let m = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(1, 0), 2.0);
        assert_eq!(m.get(0, 1), 3.0);
        assert_eq!(m.get(1, 2), 6.0);
    }

    #[test]
    fn test_from_fn_matches_get() {
        let m = Matrix::from_fn(3, 4, |r, c| (r * 10 + c) as f32);
        for r in 0..3 {
            for c in 0..4 {
                assert_eq!(m.get(r, c), (r * 10 + c) as f32);
            }
        }
    }

    #[test]
    fn test_from_vec_rejects_bad_length() {
        let err = Matrix::from_vec(2, 2, vec![0.0; 3]).unwrap_err();
        assert!(matches!(err, GemmError::InvalidDimensions(_)));
        let err = Matrix::from_vec(0, 2, vec![]).unwrap_err();
        assert!(matches!(err, GemmError::InvalidDimensions(_)));
    }

    #[test]
    fn test_byte_len() {
        assert_eq!(Matrix::zeros(128, 64).byte_len(), 128 * 64 * 4);
    }

    #[test]
    fn test_patterns_follow_flat_index() {
        let a = Matrix::pattern_a(4, 4);
        assert!((a.as_slice()[0] - 3.1).abs() < 1e-6);
        assert!((a.as_slice()[2] - (7.2 + 4.0 + 3.1)).abs() < 1e-5);
        let b = Matrix::pattern_b(4, 4);
        assert!((b.as_slice()[10] - (12.0 + 1.0 + 13.9)).abs() < 1e-5);
    }
}
