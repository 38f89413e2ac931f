//! Compressed sparse row storage.
//!
//! Symmetric matrices store their lower triangle only, diagonal included.
//! [`MatrixCsr::expand_symmetric`] rebuilds full storage for backends that
//! factorize general matrices.

use krylov_core::{EPS, Scalar};
use nalgebra::{ComplexField, DMatrix};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{DirectError, Result};

/// Square sparse matrix in CSR format with 0-based indices.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixCsr<K> {
    n: usize,
    ia: Vec<usize>,
    ja: Vec<usize>,
    a: Vec<K>,
    symmetric: bool,
}

impl<K: Scalar> MatrixCsr<K> {
    /// Build from row pointers `ia`, column indices `ja` and values `a`.
    ///
    /// Column indices must be sorted within each row. With `symmetric`, no
    /// entry may lie above the diagonal.
    pub fn new(
        n: usize,
        ia: Vec<usize>,
        ja: Vec<usize>,
        a: Vec<K>,
        symmetric: bool,
    ) -> Result<Self> {
        if ia.len() != n + 1 {
            return Err(DirectError::InvalidPattern(format!(
                "{} row pointers for {n} rows",
                ia.len()
            )));
        }
        if ia[0] != 0 || ia[n] != ja.len() || ja.len() != a.len() {
            return Err(DirectError::InvalidPattern(format!(
                "row pointers span [{}, {}] for {} indices and {} values",
                ia[0],
                ia[n],
                ja.len(),
                a.len()
            )));
        }
        for i in 0..n {
            if ia[i] > ia[i + 1] {
                return Err(DirectError::InvalidPattern(format!("row {i} has a negative length")));
            }
            let row = &ja[ia[i]..ia[i + 1]];
            if row.windows(2).any(|w| w[0] >= w[1]) {
                return Err(DirectError::InvalidPattern(format!("row {i} is not sorted")));
            }
            if let Some(&j) = row.last() {
                let bound = if symmetric { i } else { n - 1 };
                if j > bound {
                    return Err(DirectError::InvalidPattern(format!(
                        "column {j} out of range in row {i}"
                    )));
                }
            }
        }
        Ok(Self { n, ia, ja, a, symmetric })
    }

    /// Nonzeros of a dense matrix; the lower triangle only with `symmetric`.
    pub fn from_dense(matrix: &DMatrix<K>, symmetric: bool) -> Result<Self> {
        let n = matrix.nrows();
        if matrix.ncols() != n {
            return Err(DirectError::DimensionMismatch {
                expected: n,
                actual: matrix.ncols(),
            });
        }
        let mut ia = Vec::with_capacity(n + 1);
        let mut ja = Vec::new();
        let mut a = Vec::new();
        ia.push(0);
        for i in 0..n {
            let last = if symmetric { i + 1 } else { n };
            for j in 0..last {
                let v = matrix[(i, j)];
                if v != K::zero() || i == j {
                    ja.push(j);
                    a.push(v);
                }
            }
            ia.push(ja.len());
        }
        Self::new(n, ia, ja, a, symmetric)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.a.len()
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, K)> + '_ {
        let range = self.ia[i]..self.ia[i + 1];
        self.ja[range.clone()].iter().copied().zip(self.a[range].iter().copied())
    }

    /// `y = A x`, mirroring the stored triangle of symmetric matrices.
    pub fn multiply(&self, x: &[K], y: &mut [K]) -> Result<()> {
        for len in [x.len(), y.len()] {
            if len != self.n {
                return Err(DirectError::DimensionMismatch {
                    expected: self.n,
                    actual: len,
                });
            }
        }
        y.iter_mut().for_each(|yi| *yi = K::zero());
        for i in 0..self.n {
            for (j, v) in self.row(i) {
                y[i] += v * x[j];
                if self.symmetric && j != i {
                    y[j] += v * x[i];
                }
            }
        }
        Ok(())
    }

    /// Full storage of a symmetric matrix.
    ///
    /// Off-diagonal entries of modulus at most `EPS` are dropped; the diagonal
    /// is always kept. Non-symmetric matrices are returned unchanged.
    pub fn expand_symmetric(&self) -> Self {
        if !self.symmetric {
            return self.clone();
        }
        let threshold: K::RealField = nalgebra::convert(EPS);
        let mut rows: Vec<Vec<(usize, K)>> = vec![Vec::new(); self.n];
        for i in 0..self.n {
            for (j, v) in self.row(i) {
                if j == i {
                    rows[i].push((i, v));
                } else if v.modulus() > threshold {
                    rows[i].push((j, v));
                    rows[j].push((i, v));
                }
            }
        }
        sort_rows(&mut rows);

        let mut ia = Vec::with_capacity(self.n + 1);
        let nnz = rows.iter().map(Vec::len).sum();
        let mut ja = Vec::with_capacity(nnz);
        let mut a = Vec::with_capacity(nnz);
        ia.push(0);
        for row in rows {
            for (j, v) in row {
                ja.push(j);
                a.push(v);
            }
            ia.push(ja.len());
        }
        Self {
            n: self.n,
            ia,
            ja,
            a,
            symmetric: false,
        }
    }

    /// `(row, col, value)` of every stored entry.
    pub fn triplets(&self) -> Vec<(usize, usize, K)> {
        (0..self.n)
            .flat_map(|i| self.row(i).map(move |(j, v)| (i, j, v)))
            .collect()
    }
}

#[cfg(feature = "parallel")]
fn sort_rows<K: Scalar>(rows: &mut [Vec<(usize, K)>]) {
    rows.par_iter_mut().for_each(|row| row.sort_unstable_by_key(|&(j, _)| j));
}

#[cfg(not(feature = "parallel"))]
fn sort_rows<K: Scalar>(rows: &mut [Vec<(usize, K)>]) {
    rows.iter_mut().for_each(|row| row.sort_unstable_by_key(|&(j, _)| j));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower() -> MatrixCsr<f64> {
        // [4 1 0; 1 5 2; 0 2 6]
        MatrixCsr::new(
            3,
            vec![0, 1, 3, 5],
            vec![0, 0, 1, 1, 2],
            vec![4.0, 1.0, 5.0, 2.0, 6.0],
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        let unsorted = MatrixCsr::new(2, vec![0, 2, 3], vec![1, 0, 1], vec![1.0; 3], false);
        assert!(matches!(unsorted, Err(DirectError::InvalidPattern(_))));
        let upper = MatrixCsr::new(2, vec![0, 2, 3], vec![0, 1, 1], vec![1.0; 3], true);
        assert!(matches!(upper, Err(DirectError::InvalidPattern(_))));
        let short = MatrixCsr::<f64>::new(2, vec![0, 1], vec![0], vec![1.0], false);
        assert!(short.is_err());
    }

    #[test]
    fn test_symmetric_multiply_mirrors_lower_triangle() {
        let matrix = lower();
        let mut y = vec![0.0; 3];
        matrix.multiply(&[1.0, 1.0, 1.0], &mut y).unwrap();
        assert_eq!(y, vec![5.0, 8.0, 8.0]);
    }

    #[test]
    fn test_expansion_matches_symmetric_product() {
        let matrix = lower();
        let full = matrix.expand_symmetric();
        assert!(!full.is_symmetric());
        assert_eq!(full.nnz(), 7);
        let row: Vec<usize> = full.row(1).map(|(j, _)| j).collect();
        assert_eq!(row, vec![0, 1, 2]);
        let x = [0.5, -1.0, 2.0];
        let (mut y, mut z) = (vec![0.0; 3], vec![0.0; 3]);
        matrix.multiply(&x, &mut y).unwrap();
        full.multiply(&x, &mut z).unwrap();
        assert_eq!(y, z);
    }

    #[test]
    fn test_from_dense_keeps_diagonal() {
        let dense = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 3.0]);
        let matrix = MatrixCsr::from_dense(&dense, true).unwrap();
        assert_eq!(matrix.triplets(), vec![(0, 0, 0.0), (1, 0, 1.0), (1, 1, 3.0)]);
    }
}
