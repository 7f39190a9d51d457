//! Dense row-major matrix.
//!
//! Local storage for one rank's row block. Also used for whole matrices
//! that are replicated or about to be split.

use crate::error::{Result, RowBlockError};
use rayon::prelude::*;
use std::ops::{Index, IndexMut};

/// Rows per rayon task in the local kernels. Small blocks stay serial.
const PAR_MIN_ROWS: usize = 64;

/// Dense matrix stored contiguously in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    /// `values[i * cols + j]` is entry (i, j).
    values: Vec<f64>,
}

impl Default for DenseMatrix {
    fn default() -> Self {
        Self::zeros(0, 0)
    }
}

impl DenseMatrix {
    /// Create a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    /// Create a zero-filled matrix, reporting allocation failure instead of aborting.
    pub fn try_zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = rows.checked_mul(cols).ok_or_else(|| {
            RowBlockError::Allocation(format!("{}x{} overflows usize", rows, cols))
        })?;
        let mut values = Vec::new();
        values.try_reserve_exact(len).map_err(|e| {
            RowBlockError::Allocation(format!("cannot allocate {}x{} block: {}", rows, cols, e))
        })?;
        values.resize(len, 0.0);
        Ok(Self { rows, cols, values })
    }

    /// Build a matrix by evaluating `f(i, j)` for every entry.
    pub fn from_fn(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut values = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                values.push(f(i, j));
            }
        }
        Self { rows, cols, values }
    }

    /// Build a matrix from a list of equally long rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        let mut values = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(RowBlockError::Shape(format!(
                    "row {} has {} entries, expected {}",
                    i,
                    row.len(),
                    cols
                )));
            }
            values.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            values,
        })
    }

    /// Wrap an existing row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(RowBlockError::Shape(format!(
                "buffer of length {} cannot hold a {}x{} matrix",
                values.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, values })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Reshape to `rows x cols`. Contents are not preserved; the result is zero-filled.
    pub fn resize(&mut self, rows: usize, cols: usize) -> Result<()> {
        *self = Self::try_zeros(rows, cols)?;
        Ok(())
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self[(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self[(i, j)] = value;
    }

    /// Row `i` as a slice.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.cols..(i + 1) * self.cols]
    }

    /// Raw row-major storage.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }

    /// Copy out the `row_count x col_count` block starting at (`row_offset`, `col_offset`).
    pub fn get_block(
        &self,
        row_offset: usize,
        col_offset: usize,
        row_count: usize,
        col_count: usize,
    ) -> DenseMatrix {
        assert!(
            row_offset + row_count <= self.rows && col_offset + col_count <= self.cols,
            "block ({}, {}) + {}x{} exceeds {}x{} matrix",
            row_offset,
            col_offset,
            row_count,
            col_count,
            self.rows,
            self.cols
        );
        let mut values = Vec::with_capacity(row_count * col_count);
        for i in row_offset..row_offset + row_count {
            let start = i * self.cols + col_offset;
            values.extend_from_slice(&self.values[start..start + col_count]);
        }
        DenseMatrix {
            rows: row_count,
            cols: col_count,
            values,
        }
    }

    /// Dense matrix-vector multiply: y = A * x
    pub fn multiply(&self, x: &[f64]) -> Vec<f64> {
        assert_eq!(x.len(), self.cols, "multiply dimension mismatch");
        if self.cols == 0 {
            return vec![0.0; self.rows];
        }
        let row_dot = |row: &[f64]| row.iter().zip(x).map(|(a, b)| a * b).sum::<f64>();
        if self.rows >= PAR_MIN_ROWS {
            self.values.par_chunks(self.cols).map(row_dot).collect()
        } else {
            self.values.chunks(self.cols).map(row_dot).collect()
        }
    }

    /// Transpose multiply: y = Aᵀ * x
    pub fn transpose_multiply(&self, x: &[f64]) -> Vec<f64> {
        assert_eq!(x.len(), self.rows, "transpose_multiply dimension mismatch");
        self.transpose_multiply_block(x, 0, self.rows)
    }

    /// Transpose multiply against a window of a longer vector.
    ///
    /// Row `i` of this matrix is paired with `x[row_offset + i]`, for
    /// `i < row_count`. Used when this matrix is one row block of a larger
    /// one and `x` spans the full row dimension.
    pub fn transpose_multiply_block(&self, x: &[f64], row_offset: usize, row_count: usize) -> Vec<f64> {
        assert!(
            row_count <= self.rows && row_offset + row_count <= x.len(),
            "transpose_multiply_block window {}..{} invalid for {} rows / vector of {}",
            row_offset,
            row_offset + row_count,
            self.rows,
            x.len()
        );
        let mut y = vec![0.0; self.cols];
        for (i, &xi) in x[row_offset..row_offset + row_count].iter().enumerate() {
            if xi == 0.0 {
                continue;
            }
            for (yj, &a) in y.iter_mut().zip(self.row(i)) {
                *yj += a * xi;
            }
        }
        y
    }
}

impl Index<(usize, usize)> for DenseMatrix {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        assert!(i < self.rows && j < self.cols, "index ({}, {}) out of bounds", i, j);
        &self.values[i * self.cols + j]
    }
}

impl IndexMut<(usize, usize)> for DenseMatrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        assert!(i < self.rows && j < self.cols, "index ({}, {}) out of bounds", i, j);
        &mut self.values[i * self.cols + j]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DenseMatrix {
        // [[1, 2, 3], [4, 5, 6]]
        DenseMatrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap()
    }

    #[test]
    fn test_zeros() {
        let m = DenseMatrix::zeros(2, 3);
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 3);
        assert!(m.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_from_rows_ragged() {
        let err = DenseMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, RowBlockError::Shape(_)));
    }

    #[test]
    fn test_row_major_layout() {
        let m = sample();
        assert_eq!(m.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(m[(1, 0)], 4.0);
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_multiply() {
        // [[1, 2, 3], [4, 5, 6]] * [1, 0, -1] = [-2, -2]
        let y = sample().multiply(&[1.0, 0.0, -1.0]);
        assert_eq!(y, vec![-2.0, -2.0]);
    }

    #[test]
    fn test_multiply_large_matches_serial() {
        let m = DenseMatrix::from_fn(200, 5, |i, j| (i * 5 + j) as f64);
        let x = vec![1.0, -1.0, 2.0, 0.5, 0.0];
        let y = m.multiply(&x);
        for (i, &yi) in y.iter().enumerate() {
            let expected: f64 = (0..5).map(|j| m[(i, j)] * x[j]).sum();
            assert_eq!(yi, expected);
        }
    }

    #[test]
    fn test_transpose_multiply() {
        // [[1, 4], [2, 5], [3, 6]] * [1, 1] = [5, 7, 9]
        let y = sample().transpose_multiply(&[1.0, 1.0]);
        assert_eq!(y, vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_transpose_multiply_block_reads_window() {
        // Block holds rows 2..4 of some larger matrix; x spans all 5 rows.
        let block = sample();
        let x = [100.0, 100.0, 1.0, 2.0, 100.0];
        let y = block.transpose_multiply_block(&x, 2, 2);
        assert_eq!(y, vec![9.0, 12.0, 15.0]);
    }

    #[test]
    fn test_get_block() {
        let m = DenseMatrix::from_fn(4, 3, |i, j| (i * 3 + j) as f64);
        let b = m.get_block(1, 1, 2, 2);
        assert_eq!(b.rows(), 2);
        assert_eq!(b.as_slice(), &[4.0, 5.0, 7.0, 8.0]);
    }

    #[test]
    fn test_resize_discards_contents() {
        let mut m = sample();
        m.resize(3, 1).unwrap();
        assert_eq!((m.rows(), m.cols()), (3, 1));
        assert_eq!(m.as_slice(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_try_zeros_overflow() {
        let err = DenseMatrix::try_zeros(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, RowBlockError::Allocation(_)));
    }

    #[test]
    fn test_empty_column_multiply() {
        let m = DenseMatrix::zeros(3, 0);
        assert_eq!(m.multiply(&[]), vec![0.0, 0.0, 0.0]);
    }
}
